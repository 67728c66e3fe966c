//! End-to-end tests for the interaction loop against a scripted gateway.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tendril_core::history::{build_history, HistoryMode};
use tendril_core::{AgentEnv, Battery, CollectingSink, Conversation, Interaction};
use tendril_protocol::{BlockKind, UiBlock};
use tendril_provider::completion::TOOL_EXECUTION_INTERRUPTED;
use tendril_provider::{
    CacheControl, ContentBlock, ModelSelection, ModelTag, ModelTier, Outcome, Role,
    ScriptedGateway, TokenCount, TokenCounts,
};
use tendril_tools::{Tool, ToolContext, ToolOutcome, ToolRegistry, ToolResult};
use tokio_util::sync::CancellationToken;

enum Action {
    Echo,
    Interrupt(CancellationToken),
}

struct FakeTool {
    name: &'static str,
    action: Action,
    cleanups: Arc<AtomicUsize>,
}

#[async_trait]
impl Tool for FakeTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        "test tool"
    }

    fn input_schema(&self) -> Value {
        json!({"type": "object"})
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> ToolResult<ToolOutcome> {
        match &self.action {
            Action::Echo => Ok(ToolOutcome::from_blocks(
                "🔩",
                vec![UiBlock::code(args.to_string()).with_meta("echo")],
            )),
            Action::Interrupt(token) => {
                token.cancel();
                Ok(ToolOutcome::from_blocks("🔩", vec![UiBlock::warning("stopped")]))
            }
        }
    }

    async fn cleanup(&self) -> ToolResult<()> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    gateway: ScriptedGateway,
    env: AgentEnv,
    cancel: CancellationToken,
    cleanups: Arc<AtomicUsize>,
}

fn harness() -> Harness {
    let gateway = ScriptedGateway::new();
    gateway.set_token_count(TokenCount::Counted(50_000));
    let cancel = CancellationToken::new();
    let cleanups = Arc::new(AtomicUsize::new(0));

    let factory_cancel = cancel.clone();
    let factory_cleanups = cleanups.clone();
    let env = AgentEnv::new(Arc::new(gateway.clone())).with_registry(move || {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(FakeTool {
            name: "echo",
            action: Action::Echo,
            cleanups: factory_cleanups.clone(),
        }));
        registry.register(Arc::new(FakeTool {
            name: "interrupter",
            action: Action::Interrupt(factory_cancel.clone()),
            cleanups: factory_cleanups.clone(),
        }));
        registry
    });

    Harness {
        gateway,
        env,
        cancel,
        cleanups,
    }
}

fn call(id: &str, name: &str, input: Value) -> (String, String, Value) {
    (id.to_string(), name.to_string(), input)
}

async fn run(h: &mut Harness, previous: &[Interaction], message: &str) -> (Interaction, CollectingSink) {
    let mut sink = CollectingSink::new();
    let mut interaction = Interaction::new(message);
    interaction
        .run(&mut h.env, previous, &mut sink, &h.cancel)
        .await;
    (interaction, sink)
}

#[tokio::test]
async fn test_text_answer_ends_after_one_turn() {
    let mut h = harness();
    h.gateway.push_text("hello there", TokenCounts::new(100, 10));

    let (interaction, sink) = run(&mut h, &[], "hi").await;

    assert_eq!(interaction.turns.len(), 1);
    assert_eq!(h.gateway.requests().len(), 1);
    assert_eq!(sink.avatars(), ["🧬", "🤖", "💰"]);
    assert_eq!(interaction.final_battery, Battery::Percent(75.0));
    assert_eq!(h.cleanups.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_tool_results_feed_the_next_request() {
    let mut h = harness();
    h.gateway
        .push_tool_calls(
            "checking",
            vec![call("t1", "echo", json!({"n": 1})), call("t2", "echo", json!({"n": 2}))],
            TokenCounts::new(10, 5),
        )
        .push_text("done", TokenCounts::new(20, 3));

    let (interaction, sink) = run(&mut h, &[], "go").await;

    assert_eq!(interaction.turns.len(), 2);
    let ids: Vec<_> = interaction.turns[0].tool_results.keys().cloned().collect();
    assert_eq!(ids, ["t1", "t2"]);
    assert_eq!(sink.avatars(), ["🧬", "🤖", "🔧", "🔧", "🔩", "🔩", "🤖", "💰"]);

    let requests = h.gateway.requests();
    let second = &requests[1];
    let roles: Vec<_> = second.messages.iter().map(|m| m.role).collect();
    assert_eq!(roles, [Role::User, Role::Assistant, Role::User]);

    let last = second.messages.last().unwrap();
    assert!(matches!(
        &last.content[1],
        ContentBlock::ToolResult { tool_use_id, .. } if tool_use_id == "t2"
    ));
    assert_eq!(last.content[1].cache_control(), Some(CacheControl::Ephemeral));
    assert_eq!(
        last.content.last().unwrap().as_text(),
        Some("⚠️ SYSTEM NOTICE: 🔋 75%")
    );

    // One count per request plus the final battery.
    assert_eq!(h.gateway.count_requests().len(), 3);
}

#[tokio::test]
async fn test_usage_sums_and_running_total() {
    let mut h = harness();
    h.gateway
        .push_tool_calls(
            "step",
            vec![call("t1", "echo", json!({}))],
            TokenCounts::new(10, 5),
        )
        .push_text("done", TokenCounts::new(20, 3))
        .push_text("again", TokenCounts::new(7, 1));

    let (first, _) = run(&mut h, &[], "one").await;
    let turn_sum: u64 = first.turns.iter().map(|t| t.usage().input_tokens).sum();
    assert_eq!(first.usage.input_tokens, turn_sum);
    assert_eq!(first.usage.output_tokens, 8);
    assert_eq!(first.total_usage, first.usage);

    let previous = vec![first.clone()];
    let (second, _) = run(&mut h, &previous, "two").await;
    assert_eq!(second.index, 1);
    assert_eq!(second.total_usage, first.total_usage + second.usage);
    assert_eq!(second.total_usage.input_tokens, 37);
}

#[tokio::test]
async fn test_counting_failure_yields_negative_battery() {
    let mut h = harness();
    h.gateway.set_token_count(TokenCount::Failed);
    h.gateway.push_text("ok", TokenCounts::new(1, 1));

    let (interaction, sink) = run(&mut h, &[], "hi").await;

    assert_eq!(interaction.final_battery, Battery::CountingFailed);
    assert_eq!(interaction.final_battery.as_f64(), -1.0);

    let requests = h.gateway.requests();
    let request = &requests[0];
    assert_eq!(
        request.messages[0].content.last().unwrap().as_text(),
        Some("⚠️ SYSTEM NOTICE: ❌ Token counting failed")
    );
    let stats = &sink.elements.last().unwrap().blocks[0].content;
    assert!(stats.contains("counting failed"));
}

#[tokio::test]
async fn test_interrupted_tools_get_acknowledged() {
    let mut h = harness();
    h.gateway.push_tool_calls(
        "working",
        vec![
            call("t1", "interrupter", json!({})),
            call("t2", "echo", json!({})),
        ],
        TokenCounts::new(10, 5),
    );

    let (interaction, _) = run(&mut h, &[], "go").await;

    assert_eq!(h.gateway.requests().len(), 1);
    assert_eq!(interaction.turns.len(), 2);

    let skipped = &interaction.turns[0].tool_results["t2"];
    let contents: Vec<_> = skipped.blocks().map(|b| b.content.as_str()).collect();
    assert_eq!(contents, ["🛑 Tool execution skipped: interrupted by user"]);

    let ack = interaction.turns[1].completion.as_ref().unwrap();
    assert_eq!(ack.outcome, Outcome::EndTurn);
    assert!(ack.content[0]
        .as_text()
        .unwrap()
        .ends_with(TOOL_EXECUTION_INTERRUPTED));
    assert!(ack.usage().is_empty());

    let history = build_history(&[], &interaction, "S", HistoryMode::Request);
    let roles: Vec<_> = history.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        [Role::User, Role::Assistant, Role::User, Role::Assistant, Role::User]
    );
}

#[tokio::test]
async fn test_interrupt_during_request() {
    let mut h = harness();
    h.gateway
        .push_delayed_text("too late", Duration::from_secs(10));

    let trigger = h.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let (interaction, sink) = run(&mut h, &[], "hi").await;

    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(interaction.turns.len(), 1);
    let completion = interaction.turns[0].completion.as_ref().unwrap();
    assert_eq!(completion.outcome, Outcome::Interrupted);
    assert!(sink.elements[1].has_kind(BlockKind::Warning));
}

#[tokio::test]
async fn test_http_error_stops_and_stays_out_of_history() {
    let mut h = harness();
    h.gateway.push_outcome(
        Outcome::HttpError,
        vec![ContentBlock::text("⚠️ HTTP Error (500):\nboom")],
        None,
    );

    let (interaction, sink) = run(&mut h, &[], "hi").await;
    assert_eq!(interaction.turns.len(), 1);
    assert!(sink.elements[1].has_kind(BlockKind::Error));

    let history = build_history(&[], &interaction, "S", HistoryMode::Request);
    assert_eq!(history.len(), 1);
    assert!(history[0].is_user());
}

#[tokio::test]
async fn test_truncated_tool_call_leaves_no_orphan_in_history() {
    let mut h = harness();
    h.gateway.push_outcome(
        Outcome::UnexpectedStop,
        vec![
            ContentBlock::text("about to run"),
            ContentBlock::tool_use("t1", "echo", json!({"n": 1})),
        ],
        Some(TokenCounts::new(10, 5)),
    );
    let (first, _) = run(&mut h, &[], "one").await;
    assert_eq!(first.turns.len(), 1);
    assert!(first.turns[0].tool_results.is_empty());

    h.gateway.push_text("done", TokenCounts::new(10, 5));
    let (_, _) = run(&mut h, &[first], "two").await;

    let requests = h.gateway.requests();
    let second = &requests[1];
    let orphaned = second.messages.iter().any(|m| {
        m.content
            .iter()
            .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    });
    assert!(!orphaned);
    assert!(second.messages[1].text().contains("about to run"));
}

#[tokio::test]
async fn test_one_shot_model_is_consumed() {
    let mut h = harness();
    h.env.selection = ModelSelection::default().one_shot(ModelTier::Opus);
    h.gateway
        .push_tool_calls("step", vec![call("t1", "echo", json!({}))], TokenCounts::new(10, 5))
        .push_text("done", TokenCounts::new(10, 5));

    let (interaction, _) = run(&mut h, &[], "hi").await;

    let models: Vec<_> = h.gateway.requests().iter().map(|r| r.model).collect();
    assert_eq!(models, [ModelTier::Opus, ModelTier::Sonnet]);
    assert_eq!(h.env.selection, ModelSelection::fixed(ModelTier::Sonnet));
    assert_eq!(interaction.usage.model, ModelTag::Mixed);
}

#[tokio::test]
async fn test_one_shot_survives_interrupted_request() {
    let mut h = harness();
    h.env.selection = ModelSelection::default().one_shot(ModelTier::Opus);
    h.cancel.cancel();
    h.gateway.push_delayed_text("late", Duration::from_secs(10));

    run(&mut h, &[], "hi").await;
    assert!(h.env.selection.is_one_shot());
}

#[tokio::test]
async fn test_replay_matches_live_render() {
    let mut h = harness();
    h.gateway
        .push_tool_calls("step", vec![call("t1", "echo", json!({}))], TokenCounts::new(10, 5))
        .push_text("done", TokenCounts::new(10, 5));

    let (interaction, live) = run(&mut h, &[], "hi").await;
    let requests_before = h.gateway.requests().len();

    let mut replay = CollectingSink::new();
    interaction.render(&mut replay);

    assert_eq!(replay.elements, live.elements);
    assert_eq!(h.gateway.requests().len(), requests_before);
}

#[tokio::test]
async fn test_conversation_persists_between_runs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("session.json");

    let mut h = harness();
    h.gateway
        .push_text("first", TokenCounts::new(5, 5))
        .push_text("second", TokenCounts::new(5, 5));

    let mut conversation = Conversation::load(&path).await.unwrap();
    assert!(conversation.is_empty());

    let mut sink = CollectingSink::new();
    conversation
        .run_message("one", &mut h.env, &mut sink, &h.cancel)
        .await;
    conversation.save(&path).await.unwrap();

    let mut reloaded = Conversation::load(&path).await.unwrap();
    assert_eq!(reloaded.len(), 1);
    assert_eq!(
        reloaded.interactions()[0].turns,
        conversation.interactions()[0].turns
    );

    reloaded
        .run_message("two", &mut h.env, &mut sink, &h.cancel)
        .await;
    assert_eq!(reloaded.len(), 2);

    // The second request carries the first interaction's messages.
    let requests = h.gateway.requests();
    let second = &requests[1];
    assert_eq!(second.messages[0].content[0].as_text(), Some("🧬 one"));
    assert_eq!(second.messages[1].role, Role::Assistant);
}
