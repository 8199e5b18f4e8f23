//! Scripted collaborators shared by the integration tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use stepwise_agents::{Classifier, Id, IdAllocator, ModelBackend, ModelReply, Principal, Result};

/// Model that hands out scripted replies in request order.
///
/// A `None` entry (or an exhausted script) never resolves.
pub struct ScriptedModel {
    ids: IdAllocator,
    script: Mutex<VecDeque<Option<ModelReply>>>,
    replies: Mutex<HashMap<Id, Option<ModelReply>>>,
    pub inputs: Mutex<Vec<String>>,
}

impl ScriptedModel {
    pub fn new(script: Vec<Option<ModelReply>>) -> Arc<Self> {
        Arc::new(Self {
            ids: IdAllocator::new(),
            script: Mutex::new(script.into()),
            replies: Mutex::new(HashMap::new()),
            inputs: Mutex::new(Vec::new()),
        })
    }

    pub fn replying(replies: Vec<ModelReply>) -> Arc<Self> {
        Self::new(replies.into_iter().map(Some).collect())
    }

    pub fn silent() -> Arc<Self> {
        Self::new(Vec::new())
    }

    fn reply(&self, id: &Id) -> Option<ModelReply> {
        self.replies.lock().get(id).cloned().flatten()
    }
}

impl ModelBackend for ScriptedModel {
    fn request(&self, _instructions: &str, input: &str) -> Result<Id> {
        let id = self.ids.next(&Principal::new("model"), input.as_bytes());
        let reply = self.script.lock().pop_front().flatten();
        self.replies.lock().insert(id, reply);
        self.inputs.lock().push(input.to_string());
        Ok(id)
    }

    fn poll(&self, id: &Id) -> Result<Option<String>> {
        Ok(self.reply(id).map(|r| r.text))
    }

    fn detects_tool_call(&self, id: &Id, tool_name: &str) -> Result<bool> {
        Ok(self
            .reply(id)
            .map(|r| r.wants(tool_name).is_some())
            .unwrap_or(false))
    }

    fn tool_arguments(&self, id: &Id, tool_name: &str) -> Result<String> {
        Ok(self
            .reply(id)
            .and_then(|r| r.wants(tool_name).map(|c| c.arguments_text()))
            .unwrap_or_default())
    }
}

/// Classifier answering every prompt with one payload, counting requests.
pub struct SpyClassifier {
    ids: IdAllocator,
    payload: String,
    calls: AtomicUsize,
}

impl SpyClassifier {
    pub fn new(payload: &str) -> Arc<Self> {
        Arc::new(Self {
            ids: IdAllocator::new(),
            payload: payload.to_string(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Classifier for SpyClassifier {
    fn request(&self, prompt: &str) -> Result<Id> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.ids.next(&Principal::new("classifier"), prompt.as_bytes()))
    }

    fn poll(&self, _id: &Id) -> Result<Option<String>> {
        Ok(Some(self.payload.clone()))
    }
}

pub const CLEAN: &str = r#"{"overall_score": 950, "categories": {"hate": 0, "harassment": 0, "self_harm": 0, "sexual": 0, "violence": 0}}"#;
pub const HATEFUL: &str = r#"{"overall_score": 100, "categories": {"hate": 920, "harassment": 300, "self_harm": 0, "sexual": 0, "violence": 10}, "reason": "slur"}"#;

/// Log sink for a scoped `tracing` subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
