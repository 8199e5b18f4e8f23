use criterion::{criterion_group, criterion_main, BatchSize, Criterion};
use std::sync::Arc;
use stepwise_agents::{
    FunctionTool, Id, IdAllocator, ModelBackend, Principal, RunConfig, Runner,
    SdkConfig, ToolUseBehavior,
};

// Bench model: asks for the "work" tool on every request, answers at once.
struct BenchModel {
    ids: IdAllocator,
}

impl ModelBackend for BenchModel {
    fn request(&self, _instructions: &str, input: &str) -> stepwise_agents::Result<Id> {
        Ok(self.ids.next(&Principal::new("bench"), input.as_bytes()))
    }

    fn poll(&self, _id: &Id) -> stepwise_agents::Result<Option<String>> {
        Ok(Some("working".to_string()))
    }

    fn detects_tool_call(&self, _id: &Id, tool_name: &str) -> stepwise_agents::Result<bool> {
        Ok(tool_name == "work")
    }

    fn tool_arguments(&self, _id: &Id, _tool_name: &str) -> stepwise_agents::Result<String> {
        Ok("x".to_string())
    }
}

fn setup(agents: usize) -> (Runner, Vec<Id>) {
    let runner = Runner::new(SdkConfig::default());
    let owner = runner.owner().clone();
    runner
        .register_tool(
            &owner,
            Arc::new(FunctionTool::simple("work", "Does work", |s: String| s.repeat(2))),
        )
        .unwrap();
    let ids = (0..agents)
        .map(|i| {
            let config = runner
                .agent_config(format!("bench-{}", i), "Work")
                .with_tool_use_behavior(ToolUseBehavior::StopOnFirstTool);
            let agent = runner.build_agent(
                config,
                Arc::new(BenchModel {
                    ids: IdAllocator::new(),
                }),
            );
            runner.register_agent(&owner, agent).unwrap()
        })
        .collect();
    (runner, ids)
}

fn bench_advance_loop(c: &mut Criterion) {
    let mut group = c.benchmark_group("advance_loop");
    for agents in [1usize, 16, 64] {
        group.bench_function(format!("agents_{}", agents), |b| {
            b.iter_batched(
                || setup(agents),
                |(runner, ids)| {
                    let runs: Vec<Id> = ids
                        .iter()
                        .map(|id| runner.run(id, "input", RunConfig::default()).unwrap())
                        .collect();
                    let mut open = runs.clone();
                    while !open.is_empty() {
                        open.retain(|run_id| !runner.process_run(run_id).unwrap());
                    }
                    runs
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_advance_loop);
criterion_main!(benches);
