//! First agent of the fleet: normalizes the raw request and classifies it
//! into a task and target language.

use clap::Parser;
use std::sync::Arc;
use trellis_agents::payloads::{parse_task_spec, SubmitRequest};
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

    let normalize = Process::pure("normalize", |request: SubmitRequest| SubmitRequest {
        request: request.request.split_whitespace().collect::<Vec<_>>().join(" "),
    });

    let retry = MaxReflections::new(1).expect("within bound");
    let classify = Process::model(
        "classify-task",
        Reflection::up_to(retry),
        model,
        args.common.model.clone(),
        |request: &SubmitRequest, _| {
            format!(
                "You route coding requests. Reply with exactly one line of the form \
                 `<language>|<task>` where <language> is the programming language to \
                 use (default python) and <task> restates the request as an \
                 imperative task.\n\nRequest: {}",
                request.request
            )
        },
        |request: &SubmitRequest, response| parse_task_spec(&request.request, response),
    );

    let definition = AgentBuilder::named("preprocessor")
        .input::<SubmitRequest>()
        .pipeline(expect_normal(normalize.then(classify)))
        .output_to("codegen");

    run_agent(definition, config)
        .await
        .expect("preprocessor runtime failed");
}
