//! Example: a diamond-shaped workflow with a conditional gate.
//!
//! `fetch` feeds two parallel branches; `publish` joins them. The `review`
//! branch is gated on the fetched size, and the final step assembles its
//! output through `{{key}}` templates.
//!
//! Run: `cargo run -p weft-examples --example workflow_dag`

use std::env;

use weft::{Agent, AgentTask, RunContext, Step, Workflow};

#[tokio::main]
async fn main() {
    let input = env::args().nth(1).unwrap_or_else(|| "42".to_string());

    let fetch = Step::new("fetch", |_ctx, wf, _input| async move {
        let size: i64 = wf.input().parse().unwrap_or(0);
        wf.set("fetch.output", size);
        Ok(())
    });
    let summarize = Step::new("summarize", |_ctx, wf, _input| async move {
        wf.set("summarize.output", format!("summary of {}", wf.resolve("{{fetch.output}}")));
        Ok(())
    })
    .after(&["fetch"]);
    let review = Step::new("review", |_ctx, wf, _input| async move {
        wf.set("review.output", "flagged for review");
        Ok(())
    })
    .after(&["fetch"])
    .when(|wf| wf.get("fetch.output").and_then(|v| v.as_i64()).unwrap_or(0) > 100);
    let publish = Step::new("publish", |_ctx, wf, _input| async move {
        let body = wf.resolve("{{summarize.output}} {{review.output}}");
        wf.set("publish.output", body.trim().to_string());
        Ok(())
    })
    .after(&["summarize", "review"]);

    let workflow = Workflow::new(
        "pipeline",
        "fetch, branch, and publish",
        vec![fetch, summarize, review, publish],
    )
    .expect("valid graph");

    let ctx = RunContext::new();
    let result = workflow
        .execute(&ctx, AgentTask::new(input))
        .await
        .expect("execute");
    println!("{}", result.output);
}
