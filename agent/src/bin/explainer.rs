//! Explains the generated program. Upstream failures and rejections are
//! projected into apologetic explanations so the conversation still ends
//! with an answer for the user.

use clap::Parser;
use std::sync::Arc;
use trellis_agents::payloads::{Explanation, GeneratedProgram};
use trellis_agents::{init_tracing, AgentArgs};
use trellis_contract::{
    handle_upstream, AgentBuilder, ModelExecutor, Process, Reflection,
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

    let explain = Process::model(
        "explain-code",
        Reflection::none(),
        model,
        args.common.model.clone(),
        |program: &GeneratedProgram, _| {
            format!(
                "Explain to the user, in a short paragraph, what this {} program does \
                 and what its output means.\n\nProgram:\n{}\n\nOutput:\n{}",
                program.language, program.code, program.run.stdout
            )
        },
        |program: &GeneratedProgram, response| {
            Ok(Explanation {
                task: program.task.clone(),
                code: Some(program.code.clone()),
                explanation: response.trim().to_string(),
            })
        },
    );

    let pipeline = handle_upstream(
        explain,
        |failure| Explanation {
            task: String::new(),
            code: None,
            explanation: format!(
                "I could not complete this request: the {} step failed ({}).",
                failure.from_agent, failure.error
            ),
        },
        |rejection| Explanation {
            task: String::new(),
            code: None,
            explanation: format!(
                "This request was blocked by the {} safety policy: {}.",
                rejection.guardrail_name, rejection.reason
            ),
        },
    );

    let definition = AgentBuilder::named("explainer")
        .input::<GeneratedProgram>()
        .pipeline(pipeline)
        .output_to("refiner");

    run_agent(definition, config)
        .await
        .expect("explainer runtime failed");
}
