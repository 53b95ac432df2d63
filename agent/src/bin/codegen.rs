//! Generates a program for the task, runs it through the subprocess tool,
//! and reflects on failing runs with the error fed back into the prompt.
//! The finished program is checked by the `code-execution` guardrails.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use trellis_agents::payloads::{extract_code, ExecutionSummary, GeneratedProgram, TaskSpec};
use trellis_agents::{init_tracing, load_code_execution_guardrails, AgentArgs};
use trellis_contract::{
    expect_normal, AgentBuilder, MaxReflections, ModelExecutor, ModelRequest, Process, Reflection,
    Tool,
};
use trellis_registry::PromptRegistry;
use trellis_runtime::{run_agent, JsonlSink};
use trellis_tools::{CodeOutput, GenaiModel, SubprocessExecutor};

const DEFAULT_PROMPT: &str = "Write a complete, runnable {language} program that accomplishes \
the following task. Print the result to stdout and reply with the program only.\n\nTask: {task}";

const RUN_TIMEOUT_SECONDS: u64 = 30;

#[derive(Debug, Parser)]
struct Args {
    #[command(flatten)]
    common: AgentArgs,

    #[arg(long, env = "TRELLIS_PROMPTS_DB", default_value = "prompts.db")]
    prompts_db: PathBuf,

    #[arg(long, env = "TRELLIS_GUARDRAILS_DB", default_value = "guardrails.db")]
    guardrails_db: PathBuf,
}

/// One generation attempt; `feedback` carries the previous run's error.
#[derive(Debug, Clone)]
struct Attempt {
    spec: TaskSpec,
    feedback: Option<String>,
}

#[tokio::main]
async fn main() {
    init_tracing();
    let args = Args::parse();
    let config = args.common.runtime_config();

    let sink = JsonlSink::spawn(&config.log_root);
    let model: Arc<dyn ModelExecutor> = Arc::new(GenaiModel::from_env().with_sink(sink));
    let tool: Arc<dyn Tool> = Arc::new(SubprocessExecutor::python3());

    let (template, prompt_version) = prompt_template(&args.prompts_db).await;
    // Fail closed: generated code never runs without its guardrail gate.
    let guards =
        load_code_execution_guardrails(&args.guardrails_db, model.clone(), &args.common.model)
            .await
            .expect("guardrail registry unavailable; refusing to run generated code unguarded");
    tracing::info!(count = guards.len(), "loaded code-execution guardrails");

    let prepare = Process::pure("prepare", |spec: TaskSpec| Attempt {
        spec,
        feedback: None,
    });

    let reflections = MaxReflections::new(2).expect("within bound");
    let body_model = model.clone();
    let model_id = args.common.model.clone();
    let generate = Process::effect(
        "generate-and-run",
        Reflection::rewriting(reflections, |attempt: Attempt, error| Attempt {
            feedback: Some(error.to_string()),
            ..attempt
        }),
        move |attempt: Attempt, ctx| {
            let model = body_model.clone();
            let tool = tool.clone();
            let template = template.clone();
            let model_id = model_id.clone();
            let prompt_version = prompt_version.clone();
            async move {
                let mut prompt = template
                    .replace("{task}", &attempt.spec.task)
                    .replace("{language}", &attempt.spec.language);
                if let Some(feedback) = &attempt.feedback {
                    prompt.push_str(&format!(
                        "\n\nA previous attempt failed with:\n{feedback}\nFix the problem."
                    ));
                }
                let reply = model
                    .complete(ModelRequest {
                        prompt,
                        model: model_id,
                        conversation_id: ctx.conversation_id.clone(),
                        agent_name: ctx.agent_name.clone(),
                        prompt_version,
                    })
                    .await
                    .map_err(|e| e.to_string())?;
                let code = extract_code(&reply.response);

                let result = tool
                    .invoke(serde_json::json!({
                        "code": code,
                        "timeout_seconds": RUN_TIMEOUT_SECONDS,
                    }))
                    .await;
                if result.is_error() {
                    return Err(result
                        .message
                        .unwrap_or_else(|| "subprocess tool failed".to_string()));
                }
                let output: CodeOutput = serde_json::from_value(result.data)
                    .map_err(|e| format!("unexpected tool output: {e}"))?;
                if output.exit_code != 0 {
                    return Err(format!(
                        "execution failed (exit {}): {}",
                        output.exit_code,
                        output.stderr.trim()
                    ));
                }

                Ok(GeneratedProgram {
                    task: attempt.spec.task,
                    language: attempt.spec.language,
                    code,
                    run: ExecutionSummary {
                        stdout: output.stdout,
                        stderr: output.stderr,
                        exit_code: output.exit_code,
                        execution_time_ms: output.execution_time_ms,
                    },
                })
            }
        },
    );

    let definition = AgentBuilder::named("codegen")
        .input::<TaskSpec>()
        .pipeline(expect_normal(prepare.then(generate)))
        .guarded(guards, |program: &GeneratedProgram| program.code.clone())
        .output_to("explainer");

    run_agent(definition, config)
        .await
        .expect("codegen runtime failed");
}

/// The codegen prompt and its registry version. Falling back to the
/// built-in template keeps the agent serving when only the prompt store is
/// down; the guardrail store gets no such fallback.
async fn prompt_template(path: &PathBuf) -> (String, Option<String>) {
    match PromptRegistry::open(path).await {
        Ok(registry) => match registry.active("codegen").await {
            Ok(prompt) => {
                tracing::info!(version = %prompt.version, "loaded codegen prompt");
                (prompt.content, Some(prompt.version))
            }
            Err(error) => {
                tracing::warn!(%error, "falling back to built-in codegen prompt");
                (DEFAULT_PROMPT.to_string(), None)
            }
        },
        Err(error) => {
            tracing::warn!(
                %error,
                db = %path.display(),
                "prompt registry unavailable; using built-in prompt"
            );
            (DEFAULT_PROMPT.to_string(), None)
        }
    }
}
