//! Concurrent tool dispatch.
//!
//! One batch per iteration: every call in the batch is started, at most
//! `max_concurrent` hold a permit at once, and the batch settles only when
//! all calls have finished. A call that errors or panics yields an `{error}`
//! value and never touches its siblings.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::Instant;

use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Semaphore;
use tracing::{debug, warn};
use turnwright_core::{
    AgentEvent, EventEmitter, ToolCall, ToolContext, ToolError, ToolExecutor, ToolValue,
};

/// The settled result of one tool call, in call order.
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub call: ToolCall,
    /// Raw (unsanitized) value returned by the executor, or the error stand-in.
    pub value: ToolValue,
    pub success: bool,
    pub duration_ms: u64,
}

/// Run `calls` against `executor`, bounded by `max_concurrent`.
///
/// Outcomes come back in the same order as `calls`.
pub async fn execute_batch(
    executor: &dyn ToolExecutor,
    calls: &[ToolCall],
    max_concurrent: usize,
    events: &EventEmitter,
) -> Vec<CallOutcome> {
    let semaphore = Semaphore::new(max_concurrent.max(1));
    let semaphore = &semaphore;

    let pending = calls.iter().map(|call| async move {
        let _permit = semaphore.acquire().await.ok();
        execute_one(executor, call, events).await
    });
    join_all(pending).await
}

async fn execute_one(
    executor: &dyn ToolExecutor,
    call: &ToolCall,
    events: &EventEmitter,
) -> CallOutcome {
    if call.name == ToolCall::UNKNOWN {
        return CallOutcome {
            call: call.clone(),
            value: ToolValue::from(ToolError::NotFound(
                "malformed tool call without a tool name".into(),
            )),
            success: false,
            duration_ms: 0,
        };
    }

    events.emit(AgentEvent::ToolStart {
        id: call.id.clone(),
        name: call.name.clone(),
        args: call.arguments.clone(),
    });

    let ctx = ToolContext::new(call.id.clone(), call.name.clone(), events.clone());
    let started = Instant::now();
    let result = AssertUnwindSafe(executor.execute(&call.name, call.arguments.clone(), &ctx))
        .catch_unwind()
        .await;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let (value, success) = match result {
        Ok(Ok(value)) => {
            let success = !is_error_value(&value);
            (value, success)
        }
        Ok(Err(e)) => {
            warn!(tool = %call.name, id = %call.id, error = %e, "Tool execution failed");
            (ToolValue::from(e), false)
        }
        Err(payload) => {
            let reason = panic_message(payload.as_ref());
            warn!(tool = %call.name, id = %call.id, %reason, "Tool panicked");
            let err = ToolError::Panicked {
                tool_name: call.name.clone(),
                reason,
            };
            (ToolValue::from(err), false)
        }
    };
    debug!(tool = %call.name, duration_ms, success, "Tool call settled");

    events.emit(AgentEvent::ToolComplete {
        id: call.id.clone(),
        name: call.name.clone(),
        success,
        duration_ms,
    });

    CallOutcome {
        call: call.clone(),
        value,
        success,
        duration_ms,
    }
}

fn is_error_value(value: &ToolValue) -> bool {
    match value {
        ToolValue::Json(Value::Object(obj)) => obj.contains_key("error"),
        ToolValue::Error { .. } => true,
        _ => false,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
