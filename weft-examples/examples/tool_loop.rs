//! Example: the tool-calling loop with a scripted provider and streaming.
//!
//! Turn 1 calls the `clock` tool, turn 2 answers with plain text. Stream
//! events print as they arrive; the final output follows the `done` event.
//!
//! Run: `cargo run -p weft-examples --example tool_loop`

use std::sync::Arc;

use weft::{
    text_turn, tool_turn, AgentTask, LlmAgent, MockProvider, MockTool, RunContext, StreamEvent,
    StreamingAgent, ToolCall, ToolRegistry, ToolResult,
};

#[tokio::main]
async fn main() {
    let provider = Arc::new(MockProvider::script(vec![
        tool_turn("", vec![ToolCall::new("c1", "clock", "{}")]),
        text_turn("It is lunchtime."),
    ]));
    let registry =
        ToolRegistry::new().with(Arc::new(MockTool::new("clock", ToolResult::ok("12:00"))));
    let agent = LlmAgent::new("timekeeper", provider)
        .with_system_prompt("Answer using your tools.")
        .with_tools(registry);

    let ctx = RunContext::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel(64);
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::ToolCallStart { name, .. } => println!("→ calling {name}"),
                StreamEvent::ToolCallResult { name, content, .. } => {
                    println!("← {name}: {content}")
                }
                StreamEvent::TextDelta { content } => print!("{content}"),
                StreamEvent::Done { .. } => println!(),
                _ => {}
            }
        }
    });

    let result = agent
        .execute_stream(&ctx, AgentTask::new("what time is it?"), tx)
        .await
        .expect("execute");
    printer.await.expect("printer");

    println!("output: {}", result.output);
    println!("usage:  {} tokens", result.usage.total());
}
