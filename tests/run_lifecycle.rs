//! End-to-end run scenarios driven through the public API.

mod common;

use std::sync::Arc;

use common::{CapturedLogs, ScriptedModel, SpyClassifier, CLEAN, HATEFUL};
use pretty_assertions::assert_eq;
use stepwise_agents::{
    AgentStatus, AgentsError, Event, FunctionTool, GuardrailDirection, HandoffStatus, MemorySink,
    ModelReply, Principal, RunConfig, Runner, SdkConfig, StepKind, ToolUseBehavior,
};

fn runner() -> (Runner, MemorySink, Principal) {
    let sink = MemorySink::new();
    let runner = Runner::with_events(SdkConfig::default(), Arc::new(sink.clone()));
    let owner = runner.owner().clone();
    (runner, sink, owner)
}

fn echo_tool() -> Arc<FunctionTool> {
    Arc::new(FunctionTool::simple("echo", "Echoes its input", |s: String| {
        format!("{}-echoed", s)
    }))
}

#[test]
fn test_stop_on_first_tool_echo() {
    let (runner, _, owner) = runner();
    runner.register_tool(&owner, echo_tool()).unwrap();
    let model = ScriptedModel::replying(vec![
        ModelReply::text("using echo").with_tool_call("echo", "hi")
    ]);
    let config = runner
        .agent_config("Echo", "Echo things")
        .with_tool_use_behavior(ToolUseBehavior::StopOnFirstTool);
    let agent = runner.build_agent(config, model.clone());
    let agent_id = runner.register_agent(&owner, agent).unwrap();
    let agent = runner.agent(&agent_id).unwrap();

    let run_id = agent.start("say hi").unwrap();
    assert!(!agent.advance(&run_id).unwrap()); // model answer, tool call detected

    // issue tool, detect tool completion, finalize
    assert!(!agent.advance(&run_id).unwrap());
    assert!(!agent.advance(&run_id).unwrap());
    assert!(agent.advance(&run_id).unwrap());

    let run = agent.run_snapshot(&run_id).unwrap();
    assert!(run.completed);
    assert_eq!(run.final_output, "hi-echoed");
    assert_eq!(agent.status(), AgentStatus::Idle);
    assert_eq!(model.inputs.lock().len(), 1);
}

#[test]
fn test_run_llm_again_through_runner() {
    let (runner, sink, owner) = runner();
    runner.register_tool(&owner, echo_tool()).unwrap();
    let model = ScriptedModel::replying(vec![
        ModelReply::text("first I echo").with_tool_call("echo", "ping"),
        ModelReply::text("the tool said ping-echoed"),
    ]);
    let agent = runner.build_agent(runner.agent_config("Looper", "Use tools"), model.clone());
    let agent_id = runner.register_agent(&owner, agent).unwrap();

    let run_id = runner.run(&agent_id, "go", RunConfig::default()).unwrap();
    assert!(runner.poll_until_complete(&run_id, 10).unwrap());
    assert_eq!(runner.get_result(&run_id).unwrap(), "the tool said ping-echoed");

    let inputs = model.inputs.lock();
    assert_eq!(inputs[0], "go");
    assert!(inputs[1].contains("first I echo"));
    assert!(inputs[1].contains("ping-echoed"));

    let agent_run = runner.result(&run_id).unwrap().agent_run_id.unwrap();
    let kinds: Vec<StepKind> = runner
        .agent(&agent_id)
        .unwrap()
        .run_snapshot(&agent_run)
        .unwrap()
        .steps
        .iter()
        .map(|s| s.kind)
        .collect();
    assert_eq!(
        kinds,
        vec![
            StepKind::ModelCall,
            StepKind::ToolCall,
            StepKind::ModelCall,
            StepKind::Complete
        ]
    );
    assert_eq!(
        sink.count(|e| matches!(e, Event::StepCompleted { .. })),
        4
    );
}

#[test]
fn test_max_steps_guard_with_silent_model() {
    let (runner, sink, owner) = runner();
    let config = runner.agent_config("Stuck", "...").with_max_steps(5);
    let agent = runner.build_agent(config, ScriptedModel::silent());
    let agent_id = runner.register_agent(&owner, agent).unwrap();
    let agent = runner.agent(&agent_id).unwrap();

    let run_id = agent.start("hello?").unwrap();
    let mut calls = 0;
    while !agent.advance(&run_id).unwrap() {
        calls += 1;
        assert!(calls < 5);
    }
    assert_eq!(calls + 1, 5);

    let run = agent.run_snapshot(&run_id).unwrap();
    assert!(run.completed);
    assert!(run.forced);
    assert_eq!(run.final_output, "");
    assert_eq!(run.current_step_index, 0);
    assert_eq!(agent.status(), AgentStatus::Idle);
    assert_eq!(
        sink.count(|e| matches!(e, Event::RunCompleted { forced: true, .. })),
        1
    );
}

#[test]
fn test_input_guardrail_short_circuit() {
    let (runner, _, owner) = runner();
    let first = SpyClassifier::new(HATEFUL);
    let second = SpyClassifier::new(CLEAN);
    runner
        .register_guardrail(
            &owner,
            runner.content_filter("Moderation", GuardrailDirection::Input, first.clone()),
        )
        .unwrap();
    runner
        .register_guardrail(
            &owner,
            runner.content_filter("Backup", GuardrailDirection::Input, second.clone()),
        )
        .unwrap();
    let model = ScriptedModel::replying(vec![ModelReply::text("never sent")]);
    let agent = runner.build_agent(runner.agent_config("Chat", "..."), model.clone());
    let agent_id = runner.register_agent(&owner, agent).unwrap();

    let run_id = runner.run(&agent_id, "something hateful", RunConfig::default()).unwrap();
    assert!(runner.process_run(&run_id).unwrap());

    let result = runner.result(&run_id).unwrap();
    assert!(!result.is_success());
    let error = result.error().unwrap();
    assert!(error.contains("Moderation"));
    assert!(error.contains("hate (920)"));
    assert!(!error.contains("Backup"));
    assert_eq!(first.calls(), 1);
    assert_eq!(second.calls(), 0);
    assert!(model.inputs.lock().is_empty());
}

#[test]
fn test_guardrails_pass_in_order_then_run() {
    let (runner, _, owner) = runner();
    let first = SpyClassifier::new(CLEAN);
    let second = SpyClassifier::new(CLEAN);
    let output = SpyClassifier::new(CLEAN);
    for (name, dir, classifier) in [
        ("One", GuardrailDirection::Input, first.clone()),
        ("Two", GuardrailDirection::Input, second.clone()),
        ("Out", GuardrailDirection::Output, output.clone()),
    ] {
        runner
            .register_guardrail(&owner, runner.content_filter(name, dir, classifier))
            .unwrap();
    }
    let agent = runner.build_agent(
        runner.agent_config("Chat", "..."),
        ScriptedModel::replying(vec![ModelReply::text("friendly answer")]),
    );
    let agent_id = runner.register_agent(&owner, agent).unwrap();

    let run_id = runner.run(&agent_id, "hello", RunConfig::default()).unwrap();
    assert_eq!((first.calls(), second.calls(), output.calls()), (1, 1, 0));
    assert!(runner.poll_until_complete(&run_id, 10).unwrap());

    let result = runner.result(&run_id).unwrap();
    assert!(result.is_success());
    assert_eq!(result.final_output, "friendly answer");
    assert_eq!(result.validations.len(), 3);
    assert_eq!(output.calls(), 1);
}

#[test]
fn test_handoff_scenario() {
    let (runner, sink, owner) = runner();
    let a = runner
        .register_agent(
            &owner,
            runner.build_agent(
                runner.agent_config("Triage", "Route"),
                ScriptedModel::replying(vec![ModelReply::text("routing")]),
            ),
        )
        .unwrap();
    let b = runner
        .register_agent(
            &owner,
            runner.build_agent(
                runner.agent_config("Billing", "Bill"),
                ScriptedModel::replying(vec![ModelReply::text("invoice resent")]),
            ),
        )
        .unwrap();

    let handoff_id = runner
        .handoff(&Principal::agent("Triage"), &a, &b, "payload")
        .unwrap();
    let record = runner.handoffs().get(&handoff_id).unwrap();
    let billing = runner.agent(&b).unwrap();
    assert!(!billing.is_complete(&record.result_run_id).unwrap());
    assert!(matches!(
        runner.handoff_result(&handoff_id),
        Err(AgentsError::NotCompleted { .. })
    ));

    runner
        .update_handoff_status(&Principal::agent("Triage"), &handoff_id, HandoffStatus::Completed)
        .unwrap();
    while !billing.advance(&record.result_run_id).unwrap() {}
    assert_eq!(runner.handoff_result(&handoff_id).unwrap(), "invoice resent");
    assert_eq!(
        sink.count(|e| matches!(
            e,
            Event::HandoffStatusChanged {
                status: HandoffStatus::Completed,
                ..
            }
        )),
        1
    );
}

#[test]
fn test_handoff_tool_inside_a_run() {
    let (runner, _, owner) = runner();
    let specialist = runner
        .register_agent(
            &owner,
            runner.build_agent(
                runner.agent_config("Specialist", "Answer deeply"),
                ScriptedModel::replying(vec![ModelReply::text("deep answer")]),
            ),
        )
        .unwrap();
    let router = runner
        .register_agent(
            &owner,
            runner.build_agent(
                runner
                    .agent_config("Router", "Delegate")
                    .with_tool_use_behavior(ToolUseBehavior::StopOnFirstTool),
                ScriptedModel::replying(vec![ModelReply::text("delegating")
                    .with_tool_call("transfer_to_specialist", "hard question")]),
            ),
        )
        .unwrap();
    runner
        .register_handoff_tool(&owner, &router, &specialist, "Send hard questions on")
        .unwrap();

    let run_id = runner.run(&router, "hard question", RunConfig::default()).unwrap();
    assert!(runner.poll_until_complete(&run_id, 10).unwrap());
    assert!(runner.get_result(&run_id).unwrap().contains("Specialist"));

    let handoffs = runner.handoffs().handoffs_for(&router);
    assert_eq!(handoffs.len(), 1);
    let record = runner.handoffs().get(&handoffs[0]).unwrap();
    assert_eq!(record.input_data, "hard question");
    assert_eq!(
        runner.agent(&specialist).unwrap().status(),
        AgentStatus::Processing
    );
}

#[test]
fn test_teardown_frees_names() {
    let (runner, _, owner) = runner();
    let first = runner
        .register_agent(
            &owner,
            runner.build_agent(runner.agent_config("Echo", "..."), ScriptedModel::silent()),
        )
        .unwrap();
    runner.teardown(&owner).unwrap();
    assert!(matches!(
        runner.agent(&first),
        Err(AgentsError::NotFound { .. })
    ));

    let second = runner
        .register_agent(
            &owner,
            runner.build_agent(runner.agent_config("Echo", "..."), ScriptedModel::silent()),
        )
        .unwrap();
    assert_ne!(first, second);
    assert_eq!(runner.agents().count(), 2);
    assert_eq!(runner.agents().resolve_by_name("Echo").unwrap(), second);
}

#[test]
fn test_events_reach_tracing_subscriber() {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .with_max_level(tracing::Level::DEBUG)
        .finish();

    tracing::subscriber::with_default(subscriber, || {
        let runner = Runner::new(SdkConfig::default());
        let owner = runner.owner().clone();
        let agent = runner.build_agent(
            runner.agent_config("Logged", "..."),
            ScriptedModel::replying(vec![ModelReply::text("ok")]),
        );
        let agent_id = runner.register_agent(&owner, agent).unwrap();
        let run_id = runner.run(&agent_id, "hi", RunConfig::default()).unwrap();
        assert!(runner.poll_until_complete(&run_id, 10).unwrap());
    });

    let output = logs.contents();
    assert!(output.contains("Registered"));
    assert!(output.contains("Run started"));
    assert!(output.contains("Run completed"));
    assert!(output.contains("agent=Logged"));
}
