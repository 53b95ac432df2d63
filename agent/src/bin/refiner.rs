//! Terminal agent: polishes the explanation into the final answer and
//! prints the labelled result block.

use clap::Parser;
use std::sync::Arc;
use trellis_agents::payloads::{Explanation, FinalAnswer};
use trellis_agents::{init_tracing, AgentArgs};
use trellis_contract::{
    expect_normal, AgentBuilder, MaxReflections, ModelExecutor, Process, Reflection,
};
use trellis_runtime::{run_agent, JsonlSink};
use trellis_tools::GenaiModel;

#[derive(Debug, Parser)]
struct Args {
    #[command(flatten)]
    common: AgentArgs,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();
    let config = args.common.runtime_config();

    let sink = JsonlSink::spawn(&config.log_root);
    let model: Arc<dyn ModelExecutor> = Arc::new(GenaiModel::from_env().with_sink(sink));

    let retry = MaxReflections::new(1).expect("within bound");
    let refine = Process::model(
        "refine-answer",
        Reflection::up_to(retry),
        model,
        args.common.model.clone(),
        |explanation: &Explanation, _| {
            let code_section = explanation
                .code
                .as_deref()
                .map(|code| format!("\n\nCode:\n{code}"))
                .unwrap_or_default();
            format!(
                "Rewrite the following answer for the user: clear, friendly, and no \
                 more than three short paragraphs. Keep any factual content \
                 intact.\n\nAnswer:\n{}{code_section}",
                explanation.explanation
            )
        },
        |explanation: &Explanation, response| {
            Ok(FinalAnswer {
                task: explanation.task.clone(),
                code: explanation.code.clone(),
                answer: response.trim().to_string(),
            })
        },
    );

    let definition = AgentBuilder::named("refiner")
        .input::<Explanation>()
        .pipeline(expect_normal(refine))
        .terminal();

    run_agent(definition, config)
        .await
        .expect("refiner runtime failed");
}
