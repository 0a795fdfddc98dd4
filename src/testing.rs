//! Scripted collaborators for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use reqwest::Method;

use crate::error::{AuthError, Result};
use crate::http_client::{HttpRequest, HttpResponse, Transport};
use crate::secrets::SecretStore;
use crate::ui::UI;

struct Reply {
    method: Method,
    url_fragment: String,
    response: HttpResponse,
}

type Hook = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
    hook: Mutex<Option<(usize, Hook)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, method: Method, url_fragment: &str, status: u16, body: &str) -> Self {
        self.reply_from(method, url_fragment, url_fragment, status, body)
    }

    /// Reply as if redirects ended at `final_url`.
    pub fn reply_from(
        self,
        method: Method,
        url_fragment: &str,
        final_url: &str,
        status: u16,
        body: &str,
    ) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(Reply {
                method,
                url_fragment: url_fragment.to_string(),
                response: HttpResponse {
                    status,
                    url: final_url.to_string(),
                    headers: Vec::new(),
                    body: body.to_string(),
                },
            });
        self
    }

    pub fn json(self, method: Method, url_fragment: &str, body: serde_json::Value) -> Self {
        self.reply(method, url_fragment, 200, &body.to_string())
    }

    pub fn json_status(
        self,
        method: Method,
        url_fragment: &str,
        status: u16,
        body: serde_json::Value,
    ) -> Self {
        self.reply(method, url_fragment, status, &body.to_string())
    }

    /// Run `hook` right after the `n`th request has been recorded.
    pub fn after_requests(self, n: usize, hook: impl FnOnce() + Send + 'static) -> Self {
        *self.hook.lock().unwrap() = Some((n, Box::new(hook)));
        self
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn remaining(&self) -> usize {
        self.replies.lock().unwrap().len()
    }
}

impl Transport for ScriptedTransport {
    fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        let count = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len()
        };

        let reply = self.replies.lock().unwrap().pop_front();

        let fire = {
            let mut hook = self.hook.lock().unwrap();
            match hook.take() {
                Some((n, f)) if n == count => Some(f),
                other => {
                    *hook = other;
                    None
                }
            }
        };
        if let Some(f) = fire {
            f();
        }

        let reply = reply.ok_or_else(|| {
            AuthError::Transport(format!("unscripted request {} {}", request.method, request.url))
        })?;
        if reply.method != request.method || !request.url.contains(&reply.url_fragment) {
            return Err(AuthError::Transport(format!(
                "expected {} *{}*, got {} {}",
                reply.method, reply.url_fragment, request.method, request.url
            )));
        }
        Ok(reply.response)
    }
}

#[derive(Default)]
pub struct ScriptedUI {
    answers: Mutex<VecDeque<String>>,
    hidden: Mutex<VecDeque<String>>,
    selections: Mutex<VecDeque<usize>>,
    notices: Mutex<Vec<String>>,
    choices: Mutex<Vec<String>>,
    opened: Mutex<Vec<String>>,
}

impl ScriptedUI {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_answer(self, answer: &str) -> Self {
        self.answers.lock().unwrap().push_back(answer.to_string());
        self
    }

    pub fn with_hidden(self, answer: &str) -> Self {
        self.hidden.lock().unwrap().push_back(answer.to_string());
        self
    }

    pub fn with_selection(self, index: usize) -> Self {
        self.selections.lock().unwrap().push_back(index);
        self
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().unwrap().clone()
    }

    pub fn last_choices(&self) -> Vec<String> {
        self.choices.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

impl UI for ScriptedUI {
    fn prompt(&self, message: &str) -> Result<String> {
        self.answers
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AuthError::Prompt(format!("unexpected prompt: {}", message)))
    }

    fn prompt_hidden(&self, message: &str) -> Result<String> {
        self.hidden
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AuthError::Prompt(format!("unexpected hidden prompt: {}", message)))
    }

    fn notify(&self, message: &str) {
        self.notices.lock().unwrap().push(message.to_string());
    }

    fn select(&self, message: &str, items: &[String]) -> Result<usize> {
        *self.choices.lock().unwrap() = items.to_vec();
        self.selections
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| AuthError::Prompt(format!("unexpected selection: {}", message)))
    }

    fn open_url(&self, url: &str) {
        self.opened.lock().unwrap().push(url.to_string());
    }
}

#[derive(Default)]
pub struct MemorySecrets {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySecrets {
    pub fn with(key: &str, value: &str) -> Self {
        let store = Self::default();
        store.set_secret(key, value);
        store
    }
}

impl SecretStore for MemorySecrets {
    fn get_secret(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    fn set_secret(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
    }

    fn delete_secret(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}
