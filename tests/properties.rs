//! Property tests for the run state machine, the pending table and the
//! registries.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::ScriptedModel;
use proptest::prelude::*;
use stepwise_agents::{
    AgentsError, FunctionTool, IdAllocator, MemorySink, ModelReply, PendingRequestTable,
    Principal, Readiness, Runner, SdkConfig, ToolUseBehavior,
};

fn echo_runner() -> (Runner, Principal) {
    let runner = Runner::with_events(SdkConfig::default(), Arc::new(MemorySink::new()));
    let owner = runner.owner().clone();
    runner
        .register_tool(
            &owner,
            Arc::new(FunctionTool::simple("echo", "Echo", |s: String| s)),
        )
        .unwrap();
    (runner, owner)
}

/// `tool_turns` model replies asking for echo, then a plain answer.
fn script(tool_turns: usize) -> Vec<ModelReply> {
    let mut replies: Vec<ModelReply> = (0..tool_turns)
        .map(|i| ModelReply::text(format!("turn {}", i)).with_tool_call("echo", format!("arg {}", i)))
        .collect();
    replies.push(ModelReply::text("done"));
    replies
}

fn behavior() -> impl Strategy<Value = ToolUseBehavior> {
    prop_oneof![
        Just(ToolUseBehavior::StopOnFirstTool),
        Just(ToolUseBehavior::RunLlmAgain)
    ]
}

proptest! {
    #[test]
    fn advance_terminates_within_budget(
        tool_turns in 0usize..4,
        max_steps in 1usize..16,
        behavior in behavior(),
    ) {
        let (runner, owner) = echo_runner();
        let config = runner
            .agent_config("Prop", "...")
            .with_max_steps(max_steps)
            .with_tool_use_behavior(behavior);
        let agent = runner.build_agent(config, ScriptedModel::replying(script(tool_turns)));
        let agent_id = runner.register_agent(&owner, agent).unwrap();
        let agent = runner.agent(&agent_id).unwrap();

        let run_id = agent.start("go").unwrap();
        let mut calls = 0;
        let mut last_index = 0;
        let mut last_len = 1;
        loop {
            calls += 1;
            let done = agent.advance(&run_id).unwrap();
            let run = agent.run_snapshot(&run_id).unwrap();
            prop_assert!(run.current_step_index >= last_index);
            prop_assert!(run.steps.len() >= last_len);
            prop_assert!(run.current_step_index <= run.steps.len());
            last_index = run.current_step_index;
            last_len = run.steps.len();
            if done {
                break;
            }
        }
        prop_assert!(calls <= max_steps);

        let needed = match behavior {
            ToolUseBehavior::StopOnFirstTool if tool_turns > 0 => 4,
            _ => 2 + 3 * tool_turns,
        };
        let run = agent.run_snapshot(&run_id).unwrap();
        prop_assert!(run.completed);
        prop_assert_eq!(run.forced, needed > max_steps);
        if !run.forced {
            let expected = match behavior {
                ToolUseBehavior::StopOnFirstTool if tool_turns > 0 => "arg 0",
                _ => "done",
            };
            prop_assert_eq!(run.final_output.as_str(), expected);
        }
    }

    #[test]
    fn advance_after_completion_is_idempotent(tool_turns in 0usize..3, extra in 1usize..8) {
        let (runner, owner) = echo_runner();
        let agent = runner.build_agent(
            runner.agent_config("Prop", "..."),
            ScriptedModel::replying(script(tool_turns)),
        );
        let agent_id = runner.register_agent(&owner, agent).unwrap();
        let agent = runner.agent(&agent_id).unwrap();

        let run_id = agent.start("go").unwrap();
        while !agent.advance(&run_id).unwrap() {}
        let finished = agent.run_snapshot(&run_id).unwrap();

        for _ in 0..extra {
            prop_assert!(agent.advance(&run_id).unwrap());
        }
        prop_assert_eq!(agent.run_snapshot(&run_id).unwrap(), finished);
    }

    #[test]
    fn first_fulfillment_wins(payloads in prop::collection::vec("[a-z]{0,12}", 1..6)) {
        let bridge = Principal::new("bridge");
        let table = PendingRequestTable::new(
            bridge.clone(),
            Arc::new(IdAllocator::new()),
            Arc::new(MemorySink::new()),
        );
        let id = table.open(&Principal::agent("Prop"));

        for (i, payload) in payloads.iter().enumerate() {
            let outcome = table.fulfill(&bridge, &id, payload.as_str());
            if i == 0 {
                prop_assert!(outcome.is_ok());
            } else {
                prop_assert!(matches!(outcome, Err(AgentsError::AlreadyFulfilled { .. })), "expected AlreadyFulfilled, got {:?}", outcome);
            }
        }
        prop_assert_eq!(table.poll(&id).unwrap(), Readiness::Ready(payloads[0].clone()));
    }

    #[test]
    fn registry_ids_are_permanent(ops in prop::collection::vec((0usize..4, any::<bool>()), 1..24)) {
        let runner = Runner::with_events(SdkConfig::default(), Arc::new(MemorySink::new()));
        let owner = runner.owner().clone();
        let tools = runner.tools();
        let mut issued = Vec::new();
        let mut seen = HashSet::new();

        for (slot, register) in ops {
            let name = format!("tool{}", slot);
            let live = tools.resolve_by_name(&name).ok();
            match (register, live) {
                (true, None) => {
                    let id = tools
                        .register(&owner, Arc::new(FunctionTool::simple(&name, "", |s: String| s)))
                        .unwrap();
                    prop_assert!(seen.insert(id));
                    issued.push(id);
                }
                (true, Some(_)) => {
                    let dup = tools.register(&owner, Arc::new(FunctionTool::simple(&name, "", |s: String| s)));
                    prop_assert!(
                        matches!(dup, Err(AgentsError::DuplicateName { .. })),
                        "duplicate registration was accepted"
                    );
                }
                (false, Some(id)) => {
                    tools.unregister(&owner, &id).unwrap();
                    prop_assert!(tools.resolve(&id).is_err());
                }
                (false, None) => {}
            }

            prop_assert_eq!(tools.count(), issued.len());
            for (index, id) in issued.iter().enumerate() {
                prop_assert_eq!(tools.id_at(index).unwrap(), *id);
            }
        }
        let out_of_range = tools.id_at(issued.len());
        prop_assert!(
            matches!(out_of_range, Err(AgentsError::IndexOutOfBounds { .. })),
            "enumeration past the end succeeded"
        );
    }
}
