//! Binary entrypoint that launches the SmolVLM2 chat server.

use std::process::ExitCode;

use smolvlm_chat::start_smolvlm_chat;

/// Load configuration, connect to the inference sidecar and serve the chat page.
fn main() -> ExitCode {
    start_smolvlm_chat::run()
}
