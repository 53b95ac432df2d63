//! In-process wiring checks for the fleet's pipelines, with a scripted
//! model standing in for the provider.

use std::sync::Arc;
use trellis_agents::payloads::{parse_task_spec, Explanation, GeneratedProgram, SubmitRequest};
use trellis_contract::testing::ScriptedModel;
use trellis_contract::{
    decode_payload, encode_payload, expect_normal, handle_upstream, AgentBuilder, Envelope,
    Inbound, Outcome, PayloadType, PipelineContext, Process, Reflection, UpstreamRejection,
};

#[tokio::test]
async fn preprocessor_pipeline_turns_a_request_into_a_task_spec() {
    let model = Arc::new(ScriptedModel::replies(["python|sum the numbers 1..100"]));
    let normalize = Process::pure("normalize", |request: SubmitRequest| SubmitRequest {
        request: request.request.split_whitespace().collect::<Vec<_>>().join(" "),
    });
    let classify = Process::model(
        "classify-task",
        Reflection::none(),
        model,
        "test-model",
        |request: &SubmitRequest, _| format!("classify: {}", request.request),
        |request: &SubmitRequest, response| parse_task_spec(&request.request, response),
    );

    let definition = AgentBuilder::named("preprocessor")
        .input::<SubmitRequest>()
        .pipeline(expect_normal(normalize.then(classify)))
        .output_to("codegen");

    let ctx = PipelineContext::initial("preprocessor", "t-1", "C-42");
    let inbound = Inbound::Normal(SubmitRequest {
        request: "  sum   the numbers  ".to_string(),
    });
    match definition.execute(inbound, ctx).await {
        Outcome::Success { value, ctx } => {
            assert_eq!(value.language, "python");
            assert_eq!(value.task, "sum the numbers 1..100");
            assert_eq!(ctx.step_index, 2);
            assert_eq!(ctx.conversation_id, "C-42");
        }
        other => panic!("expected Success, got {other:?}"),
    }
}

#[tokio::test]
async fn explainer_projects_an_upstream_rejection_into_an_apology() {
    let model = Arc::new(ScriptedModel::replies(["unused"]));
    let explain = Process::model(
        "explain-code",
        Reflection::none(),
        model,
        "test-model",
        |program: &GeneratedProgram, _| format!("explain: {}", program.code),
        |program: &GeneratedProgram, response| {
            Ok(Explanation {
                task: program.task.clone(),
                code: Some(program.code.clone()),
                explanation: response.to_string(),
            })
        },
    );
    let pipeline = handle_upstream(
        explain,
        |failure| Explanation {
            task: String::new(),
            code: None,
            explanation: format!("upstream failed: {}", failure.error),
        },
        |rejection| Explanation {
            task: String::new(),
            code: None,
            explanation: format!(
                "blocked by the {} safety policy: {}",
                rejection.guardrail_name, rejection.reason
            ),
        },
    );
    let definition = AgentBuilder::named("explainer")
        .input::<GeneratedProgram>()
        .pipeline(pipeline)
        .output_to("refiner");

    let envelope = Envelope::new(
        "codegen",
        "explainer",
        "t-1",
        "C-42",
        PayloadType::UpstreamRejection,
        encode_payload(&UpstreamRejection {
            from_agent: "codegen".to_string(),
            guardrail_name: "no-network".to_string(),
            reason: "opens a socket".to_string(),
        }),
    );
    let inbound = decode_payload::<GeneratedProgram>(&envelope).unwrap();
    let ctx = PipelineContext::initial("explainer", &envelope.trace_id, &envelope.conversation_id);

    match definition.execute(inbound, ctx).await {
        Outcome::Success { value, .. } => {
            assert!(value.explanation.contains("no-network"));
            assert!(value.explanation.contains("opens a socket"));
            assert!(value.code.is_none());
        }
        other => panic!("expected Success, got {other:?}"),
    }
}
