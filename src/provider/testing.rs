use crate::provider::gateway::{CompletionRequest, ModelGateway, ProviderKind};
use anyhow::{Result, anyhow};
use std::collections::VecDeque;
use std::sync::Mutex;

type Responder = Box<dyn Fn(usize, &CompletionRequest) -> Result<String> + Send + Sync>;

/// In-process gateway that records every request and answers from a script.
pub struct ScriptedGateway {
    responder: Responder,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedGateway {
    pub fn new(
        responder: impl Fn(usize, &CompletionRequest) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            responder: Box::new(responder),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn constant(reply: &str) -> Self {
        let reply = reply.to_string();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    /// `Err` entries become gateway failures; calls past the end get `reply N`.
    pub fn sequence(replies: Vec<std::result::Result<&str, &str>>) -> Self {
        let queue: Mutex<VecDeque<std::result::Result<String, String>>> = Mutex::new(
            replies
                .into_iter()
                .map(|r| r.map(str::to_string).map_err(str::to_string))
                .collect(),
        );
        Self::new(move |idx, _| {
            let next = queue.lock().map_err(|_| anyhow!("poisoned"))?.pop_front();
            match next {
                Some(Ok(text)) => Ok(text),
                Some(Err(msg)) => Err(anyhow!(msg)),
                None => Ok(format!("reply {}", idx + 1)),
            }
        })
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.prompt).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or_default()
    }
}

impl ModelGateway for ScriptedGateway {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model(&self) -> &str {
        "scripted"
    }

    fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let idx = {
            let mut calls = self.calls.lock().map_err(|_| anyhow!("poisoned"))?;
            calls.push(request.clone());
            calls.len() - 1
        };
        (self.responder)(idx, request)
    }
}
