// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Batch tool execution.
//!
//! The executor takes the tool calls of one assistant message and produces a
//! matching batch of results in input order.  Calls run concurrently under a
//! semaphore bound, each with a context derived from the turn's; a panicking
//! handler is isolated by running every call in its own task.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::warn;

use manifold_model::{Ctx, Error, ToolCall, ToolErrorKind, ToolResult};

use crate::registry::Toolkit;

/// Default upper bound on concurrently running tool calls.
pub const DEFAULT_MAX_PARALLEL: usize = 8;

#[derive(Debug, Clone)]
pub struct Executor {
    max_parallel: usize,
}

impl Default for Executor {
    fn default() -> Self {
        Self { max_parallel: DEFAULT_MAX_PARALLEL }
    }
}

impl Executor {
    pub fn new(max_parallel: usize) -> Self {
        Self { max_parallel: max_parallel.max(1) }
    }

    /// Execute a batch of calls against `toolkit`.
    ///
    /// Always returns one result per call, in input order.  Individual
    /// failures — unknown tool, argument decode, handler error, timeout,
    /// panic — become error-valued results; they never abort the batch.
    pub async fn execute_batch(
        &self,
        ctx: &Ctx,
        toolkit: &Toolkit,
        calls: &[ToolCall],
    ) -> Vec<ToolResult> {
        let bound = self.max_parallel.min(calls.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(bound));

        let mut tasks = Vec::with_capacity(calls.len());
        for call in calls.iter().cloned() {
            let tool = toolkit.get(&call.name);
            let semaphore = Arc::clone(&semaphore);
            let ctx = ctx.child();
            tasks.push(tokio::spawn(async move {
                // A closed semaphore is impossible here; the permit only
                // bounds concurrency.
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                run_one(&ctx, tool, call).await
            }));
        }

        let mut results = Vec::with_capacity(calls.len());
        for (i, task) in tasks.into_iter().enumerate() {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => {
                    warn!(tool = %calls[i].name, "tool task failed: {e}");
                    let kind = if e.is_panic() {
                        ToolErrorKind::Panicked
                    } else {
                        ToolErrorKind::Failed
                    };
                    ToolResult::err(calls[i].clone(), kind, format!("tool task aborted: {e}"))
                }
            };
            results.push(result);
        }
        results
    }
}

async fn run_one(
    ctx: &Ctx,
    tool: Option<Arc<dyn crate::tool::Tool>>,
    call: ToolCall,
) -> ToolResult {
    let Some(tool) = tool else {
        return ToolResult::err(
            call.clone(),
            ToolErrorKind::UnknownTool,
            format!("unknown tool: {}", call.name),
        );
    };

    // Decode the arguments against the registered schema.  A mismatch is an
    // error result, not a batch failure.
    let schema = tool.parameters_schema();
    match jsonschema::validator_for(&schema) {
        Ok(validator) => {
            if let Err(e) = validator.validate(&call.arguments) {
                return ToolResult::err(
                    call.clone(),
                    ToolErrorKind::InvalidArguments,
                    format!("arguments do not match schema: {e}"),
                );
            }
        }
        Err(e) => {
            return ToolResult::err(
                call.clone(),
                ToolErrorKind::InvalidArguments,
                format!("parameter schema failed to compile: {e}"),
            );
        }
    }

    match ctx.run(tool.call(ctx, call.arguments.clone())).await {
        Ok(value) => {
            // The wire needs a JSON rendering; anything that cannot encode is
            // reported with its textual rendering instead.
            if let Err(e) = serde_json::to_string(&value) {
                return ToolResult::err(
                    call.clone(),
                    ToolErrorKind::ResultEncoding,
                    format!("result not JSON-encodable ({e}): {value}"),
                );
            }
            ToolResult::ok(call, value)
        }
        Err(Error::Cancelled) => ToolResult::err(
            call,
            ToolErrorKind::Timeout,
            "tool call deadline exceeded or cancelled",
        ),
        Err(e) => ToolResult::err(call, ToolErrorKind::Failed, e.to_string()),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::{json, Value};

    use super::*;
    use crate::tool::FnTool;

    fn weather_kit() -> Toolkit {
        let mut kit = Toolkit::new();
        kit.register(FnTool::new(
            "weather_in_city",
            "weather lookup",
            json!({
                "type": "object",
                "properties": { "city": { "type": "string" } },
                "required": ["city"],
            }),
            |_ctx, _args| async move { Ok(json!("sunny")) },
        ))
        .unwrap();
        kit
    }

    fn call(id: &str, name: &str, args: Value) -> ToolCall {
        ToolCall { id: id.into(), name: name.into(), arguments: args }
    }

    #[tokio::test]
    async fn batch_results_match_input_order() {
        let mut kit = Toolkit::new();
        kit.register(FnTool::new(
            "slow_echo",
            "echoes after a delay proportional to the value",
            json!({ "type": "object" }),
            |_ctx, args| async move {
                let ms = args["delay"].as_u64().unwrap_or(0);
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(args)
            },
        ))
        .unwrap();

        let calls = vec![
            call("c1", "slow_echo", json!({"delay": 40, "tag": 1})),
            call("c2", "slow_echo", json!({"delay": 0, "tag": 2})),
            call("c3", "slow_echo", json!({"delay": 20, "tag": 3})),
        ];
        let results = Executor::default()
            .execute_batch(&Ctx::background(), &kit, &calls)
            .await;
        let tags: Vec<i64> = results.iter().map(|r| r.value["tag"].as_i64().unwrap()).collect();
        assert_eq!(tags, vec![1, 2, 3]);
        assert_eq!(results[1].call.id, "c2");
    }

    #[tokio::test]
    async fn unknown_tool_is_error_result_not_batch_failure() {
        let kit = weather_kit();
        let calls = vec![
            call("c1", "no_such_tool", json!({})),
            call("c2", "weather_in_city", json!({"city": "Berlin"})),
        ];
        let results = Executor::default()
            .execute_batch(&Ctx::background(), &kit, &calls)
            .await;
        assert_eq!(results[0].error.as_ref().unwrap().kind, ToolErrorKind::UnknownTool);
        assert!(!results[1].is_error());
        assert_eq!(results[1].value, json!("sunny"));
    }

    #[tokio::test]
    async fn invalid_arguments_are_rejected_by_schema() {
        let kit = weather_kit();
        let calls = vec![call("c1", "weather_in_city", json!({"city": 42}))];
        let results = Executor::default()
            .execute_batch(&Ctx::background(), &kit, &calls)
            .await;
        assert_eq!(
            results[0].error.as_ref().unwrap().kind,
            ToolErrorKind::InvalidArguments
        );
        assert!(results[0].value["error"].is_string());
    }

    #[tokio::test]
    async fn panicking_handler_is_captured() {
        let mut kit = Toolkit::new();
        kit.register(FnTool::new(
            "boom",
            "always panics",
            json!({ "type": "object" }),
            |_ctx, _args| async move {
                panic!("kaboom");
                #[allow(unreachable_code)]
                Ok(json!(null))
            },
        ))
        .unwrap();
        kit.register(FnTool::new(
            "fine",
            "works",
            json!({ "type": "object" }),
            |_ctx, _args| async move { Ok(json!("ok")) },
        ))
        .unwrap();

        let calls = vec![
            call("c1", "boom", json!({})),
            call("c2", "fine", json!({})),
        ];
        let results = Executor::default()
            .execute_batch(&Ctx::background(), &kit, &calls)
            .await;
        assert_eq!(results[0].error.as_ref().unwrap().kind, ToolErrorKind::Panicked);
        assert!(!results[1].is_error());
    }

    #[tokio::test]
    async fn handler_error_becomes_failed_result() {
        let mut kit = Toolkit::new();
        kit.register(FnTool::new(
            "flaky",
            "always errors",
            json!({ "type": "object" }),
            |_ctx, _args| async move {
                Err::<Value, _>(manifold_model::Error::BadParameter("nope".into()))
            },
        ))
        .unwrap();
        let results = Executor::default()
            .execute_batch(&Ctx::background(), &kit, &[call("c1", "flaky", json!({}))])
            .await;
        assert_eq!(results[0].error.as_ref().unwrap().kind, ToolErrorKind::Failed);
    }

    #[tokio::test]
    async fn deadline_expiry_times_out_the_call() {
        let mut kit = Toolkit::new();
        kit.register(FnTool::new(
            "sleepy",
            "sleeps forever",
            json!({ "type": "object" }),
            |_ctx, _args| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(json!(null))
            },
        ))
        .unwrap();
        let ctx = Ctx::with_timeout(Duration::from_millis(20));
        let results = Executor::default()
            .execute_batch(&ctx, &kit, &[call("c1", "sleepy", json!({}))])
            .await;
        assert_eq!(results[0].error.as_ref().unwrap().kind, ToolErrorKind::Timeout);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        static RUNNING: AtomicUsize = AtomicUsize::new(0);
        static PEAK: AtomicUsize = AtomicUsize::new(0);

        let mut kit = Toolkit::new();
        kit.register(FnTool::new(
            "tracked",
            "tracks concurrent executions",
            json!({ "type": "object" }),
            |_ctx, _args| async move {
                let now = RUNNING.fetch_add(1, Ordering::SeqCst) + 1;
                PEAK.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                RUNNING.fetch_sub(1, Ordering::SeqCst);
                Ok(json!(null))
            },
        ))
        .unwrap();

        let calls: Vec<ToolCall> = (0..6)
            .map(|i| call(&format!("c{i}"), "tracked", json!({})))
            .collect();
        Executor::new(2)
            .execute_batch(&Ctx::background(), &kit, &calls)
            .await;
        assert!(PEAK.load(Ordering::SeqCst) <= 2, "peak {}", PEAK.load(Ordering::SeqCst));
    }
}
