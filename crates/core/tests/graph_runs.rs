//! End-to-end runs of the research graph against a scripted model.

use researcher_core::config::RunConfig;
use researcher_core::error::RunError;
use researcher_core::llm::ChatModel;
use researcher_core::skills::tools::{CapabilityKind, CapabilityRegistry};
use researcher_core::state::{Message, ToolCall};
use researcher_core::swarm::{Coordinator, RunInput, Stage};
use researcher_core::testing::{FakeCapability, ScriptedModel};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn coordinator(model: &Arc<ScriptedModel>, registry: CapabilityRegistry) -> Coordinator {
    let model: Arc<dyn ChatModel> = model.clone();
    Coordinator::new(model, Arc::new(registry), RunConfig::default())
}

fn research_registry() -> CapabilityRegistry {
    CapabilityRegistry::new()
        .register(FakeCapability::reply(
            CapabilityKind::SearchPapers,
            json!("* ID: 1,\n* Title: Deep RL from Human Preferences"),
        ))
        .register(FakeCapability::reply(CapabilityKind::DownloadPaper, json!("full text")))
        .register(FakeCapability::reply(CapabilityKind::AskHumanFeedback, json!("yes")))
}

fn search_call(id: &str) -> ToolCall {
    ToolCall::new(id, "search-papers", json!({"query": "rlhf", "max_papers": 1}))
}

#[tokio::test]
async fn test_no_research_ends_after_decision() {
    let model = Arc::new(
        ScriptedModel::new().respond_json(json!({"requires_research": false, "answer": "Doing well!"})),
    );
    let outcome = coordinator(&model, research_registry())
        .run(RunInput::new("How are you?"))
        .await
        .unwrap();

    assert_eq!(outcome.visited, vec![Stage::DecisionMaking]);
    assert_eq!(
        outcome.state.messages,
        vec![Message::human("How are you?"), Message::ai("Doing well!")]
    );
    assert_eq!(outcome.state.num_feedback_requests, 0);
    assert_eq!(model.call_count(), 1);
}

#[tokio::test]
async fn test_single_tool_call_loop_visit_counts() {
    let model = Arc::new(
        ScriptedModel::new()
            .respond_json(json!({"requires_research": true}))
            .respond_text("1. Use search-papers to find the RLHF paper.")
            .respond_tool_calls(vec![search_call("call_1")])
            .respond_text("RLHF was introduced in [1].")
            .respond_json(json!({"is_good_answer": true})),
    );
    let outcome = coordinator(&model, research_registry())
        .run(RunInput::new("Who introduced RLHF?"))
        .await
        .unwrap();

    assert_eq!(
        outcome.visited,
        vec![
            Stage::DecisionMaking,
            Stage::Planning,
            Stage::Agent,
            Stage::Tools,
            Stage::Agent,
            Stage::Judge,
        ]
    );
    assert_eq!(outcome.visits(Stage::Planning), 1);
    assert_eq!(outcome.visits(Stage::Agent), 2);
    assert_eq!(outcome.visits(Stage::Tools), 1);
    assert_eq!(outcome.state.num_feedback_requests, 1);
    assert!(outcome.state.is_good_answer);
    assert!(!outcome.forced_acceptance);
    assert_eq!(outcome.answer(), Some("RLHF was introduced in [1]."));
    assert_eq!(model.remaining(), 0);
}

#[tokio::test]
async fn test_tool_messages_match_calls_one_to_one() {
    let calls = vec![
        search_call("a"),
        ToolCall::new("b", "download-paper", json!({"url": "https://x/y.pdf"})),
        search_call("c"),
    ];
    let model = Arc::new(
        ScriptedModel::new()
            .respond_json(json!({"requires_research": true}))
            .respond_text("plan")
            .respond_tool_calls(calls.clone())
            .respond_text("answer")
            .respond_json(json!({"is_good_answer": true})),
    );
    let outcome = coordinator(&model, research_registry())
        .run(RunInput::new("q"))
        .await
        .unwrap();

    let tool_ids: Vec<&str> = outcome
        .state
        .messages
        .iter()
        .filter_map(|m| match m {
            Message::Tool { tool_call_id, .. } => Some(tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(tool_ids, vec!["a", "b", "c"]);
    assert!(outcome.state.tool_messages_are_paired());

    // the act step after the tools sees every result
    let second_act = &model.requests()[3];
    assert_eq!(
        second_act.messages.iter().filter(|m| m.kind() == "tool").count(),
        3
    );
}

#[tokio::test]
async fn test_two_rejections_then_forced_acceptance() {
    let model = Arc::new(
        ScriptedModel::new()
            .respond_json(json!({"requires_research": true}))
            .respond_text("plan 1")
            .respond_text("answer 1")
            .respond_json(json!({"is_good_answer": false, "feedback": "Add citations."}))
            .respond_text("plan 2")
            .respond_text("answer 2")
            .respond_json(json!({"is_good_answer": false, "feedback": "Still vague."}))
            .respond_text("plan 3")
            .respond_text("answer 3"),
    );
    let outcome = coordinator(&model, research_registry())
        .run(RunInput::new("q"))
        .await
        .unwrap();

    assert_eq!(outcome.visits(Stage::Judge), 3);
    assert_eq!(outcome.state.num_feedback_requests, 2);
    assert!(outcome.state.is_good_answer);
    assert!(outcome.forced_acceptance);
    assert_eq!(outcome.answer(), Some("answer 3"));
    // the third evaluation never reached the model
    assert_eq!(model.call_count(), 9);

    // critique is part of the history seen by the next planning pass
    let second_plan = &model.requests()[4];
    assert_eq!(
        second_plan.messages.last(),
        Some(&Message::ai("Add citations."))
    );
}

#[tokio::test]
async fn test_configured_cap_is_respected() {
    let model = Arc::new(
        ScriptedModel::new()
            .respond_json(json!({"requires_research": true}))
            .respond_text("plan")
            .respond_text("answer"),
    );
    let config = RunConfig {
        max_feedback_requests: 0,
        ..RunConfig::default()
    };
    let dyn_model: Arc<dyn ChatModel> = model.clone();
    let outcome = Coordinator::new(dyn_model, Arc::new(research_registry()), config)
        .run(RunInput::new("q"))
        .await
        .unwrap();

    assert!(outcome.forced_acceptance);
    assert_eq!(model.call_count(), 3);
}

#[tokio::test]
async fn test_capability_failure_is_fed_back_to_model() {
    let failing = FakeCapability::failing(CapabilityKind::SearchPapers, "CORE API down");
    let calls = failing.calls();
    let registry = CapabilityRegistry::new().register(failing);

    let model = Arc::new(
        ScriptedModel::new()
            .respond_json(json!({"requires_research": true}))
            .respond_text("plan")
            .respond_tool_calls(vec![search_call("call_1")])
            .respond_text("The search service is unavailable.")
            .respond_json(json!({"is_good_answer": true})),
    );
    let outcome = coordinator(&model, registry)
        .run(RunInput::new("q"))
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let tool_message = outcome
        .state
        .messages
        .iter()
        .find(|m| m.kind() == "tool")
        .unwrap();
    let payload: serde_json::Value = serde_json::from_str(tool_message.content()).unwrap();
    assert!(payload["error"].as_str().unwrap().contains("CORE API down"));
}

#[tokio::test]
async fn test_unknown_capability_is_fatal() {
    let search = FakeCapability::echo(CapabilityKind::SearchPapers);
    let search_calls = search.calls();
    let model = Arc::new(
        ScriptedModel::new()
            .respond_json(json!({"requires_research": true}))
            .respond_text("plan")
            .respond_tool_calls(vec![
                search_call("ok"),
                ToolCall::new("bad", "search_web", json!({"query": "x"})),
            ]),
    );
    let err = coordinator(&model, CapabilityRegistry::new().register(search))
        .run(RunInput::new("q"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RunError::UnknownCapability { ref call_id, ref name } if call_id == "bad" && name == "search_web"
    ));
    // nothing was dispatched
    assert_eq!(search_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_endless_tool_loop_hits_step_limit() {
    let mut script = ScriptedModel::new()
        .respond_json(json!({"requires_research": true}))
        .respond_text("plan");
    for i in 0..20 {
        script = script.respond_tool_calls(vec![search_call(&format!("call_{}", i))]);
    }
    let model = Arc::new(script);
    let config = RunConfig {
        max_steps: 10,
        ..RunConfig::default()
    };
    let dyn_model: Arc<dyn ChatModel> = model.clone();
    let err = Coordinator::new(dyn_model, Arc::new(research_registry()), config)
        .run(RunInput::new("q"))
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::StepLimit(10)));
}

#[tokio::test]
async fn test_history_is_passed_to_every_call() {
    let history = vec![
        Message::human("What is PPO?"),
        Message::ai("A policy gradient method."),
    ];
    let model = Arc::new(
        ScriptedModel::new().respond_json(json!({"requires_research": false, "answer": "Yes."})),
    );
    coordinator(&model, research_registry())
        .run(RunInput::new("Is it on-policy?").with_history(history))
        .await
        .unwrap();

    let request = &model.requests()[0];
    assert_eq!(request.messages.len(), 3);
    assert_eq!(request.messages[2], Message::human("Is it on-policy?"));
}
