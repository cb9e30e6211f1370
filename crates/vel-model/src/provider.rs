// Copyright (c) 2024-2026 The Vel Authors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::{CompletionRequest, ResponseEvent};

pub type ResponseStream = Pin<Box<dyn Stream<Item = anyhow::Result<ResponseEvent>> + Send>>;

/// Contract for a streaming LLM provider.
///
/// Concrete network drivers live outside this workspace; the harness only
/// depends on this trait.  The bundled [`MockProvider`][crate::MockProvider]
/// and [`ScriptedMockProvider`][crate::ScriptedMockProvider] implement it for
/// tests and the demo runner.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Human-readable provider name for status display.
    fn name(&self) -> &str;

    /// Model identifier as reported to users.
    fn model_name(&self) -> &str;

    /// Send a completion request and return a streaming response.
    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream>;

    /// Context window size for this provider/model combination.
    ///
    /// Reads from the static catalog; returns `None` if the model is unknown.
    fn context_window(&self) -> Option<u32> {
        crate::catalog::window_for_model(self.model_name())
    }
}
