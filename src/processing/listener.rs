use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use teloxide::types::ChatId;
use tokio::sync::mpsc;

use crate::session::{RequestId, Session};

/// Inbound events routed to a request that is waiting on its chat.
#[derive(Debug)]
pub(crate) enum Inbound<P> {
    Thumbnail(P),
    Spoiler(bool),
    Cancel,
}

#[derive(Debug)]
pub(crate) enum Wait<P> {
    Thumbnail(P),
    TimedOut,
    Cancelled,
}

struct Registration<P> {
    request: RequestId,
    sender: mpsc::UnboundedSender<Inbound<P>>,
    awaiting_thumbnail: bool,
}

/// Per-chat registry of requests waiting for follow-up events. Thumbnails go
/// to the oldest request of the chat still waiting for one; spoiler choices go
/// to the request named in the button.
pub(crate) struct Listeners<P> {
    chats: Arc<Mutex<HashMap<ChatId, Vec<Registration<P>>>>>,
}

impl<P> Clone for Listeners<P> {
    fn clone(&self) -> Self {
        Self {
            chats: Arc::clone(&self.chats),
        }
    }
}

impl<P> Default for Listeners<P> {
    fn default() -> Self {
        Self {
            chats: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<P> Listeners<P> {
    fn chats(&self) -> MutexGuard<'_, HashMap<ChatId, Vec<Registration<P>>>> {
        self.chats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a request that waits for a thumbnail and can be cancelled.
    pub(crate) fn listen(&self, request: RequestId) -> Listener<P> {
        self.register(request, true)
    }

    /// Registers a request that can only be cancelled.
    pub(crate) fn watch(&self, request: RequestId) -> Listener<P> {
        self.register(request, false)
    }

    fn register(&self, request: RequestId, awaiting_thumbnail: bool) -> Listener<P> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.chats()
            .entry(request.chat_id)
            .or_default()
            .push(Registration {
                request,
                sender,
                awaiting_thumbnail,
            });
        Listener {
            request,
            receiver,
            listeners: self.clone(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_awaiting_thumbnail(&self, chat_id: ChatId) -> bool {
        self.chats()
            .get(&chat_id)
            .map_or(false, |registrations| {
                registrations.iter().any(|r| r.awaiting_thumbnail)
            })
    }

    /// Hands the thumbnail to a waiting request. Gives it back when no request
    /// of the chat wants one.
    pub(crate) fn deliver_thumbnail(&self, chat_id: ChatId, thumbnail: P) -> Result<RequestId, P> {
        let mut chats = self.chats();
        let Some(registrations) = chats.get_mut(&chat_id) else {
            return Err(thumbnail);
        };
        let Some(registration) = registrations.iter_mut().find(|r| r.awaiting_thumbnail) else {
            return Err(thumbnail);
        };
        // Receivers unregister under this lock before they are dropped.
        registration.awaiting_thumbnail = false;
        if let Err(mpsc::error::SendError(Inbound::Thumbnail(returned))) =
            registration.sender.send(Inbound::Thumbnail(thumbnail))
        {
            return Err(returned);
        }
        Ok(registration.request)
    }

    /// Spoiler choices are only accepted until the thumbnail arrives.
    pub(crate) fn deliver_spoiler(&self, request: RequestId, spoiler: bool) -> bool {
        self.chats()
            .get(&request.chat_id)
            .and_then(|registrations| {
                registrations
                    .iter()
                    .find(|r| r.request == request && r.awaiting_thumbnail)
            })
            .map_or(false, |r| r.sender.send(Inbound::Spoiler(spoiler)).is_ok())
    }

    /// Cancels every request of the chat, returns how many were reached.
    pub(crate) fn cancel(&self, chat_id: ChatId) -> usize {
        self.chats().get(&chat_id).map_or(0, |registrations| {
            registrations
                .iter()
                .filter(|r| r.sender.send(Inbound::Cancel).is_ok())
                .count()
        })
    }

    fn remove(&self, request: RequestId) {
        let mut chats = self.chats();
        if let Some(registrations) = chats.get_mut(&request.chat_id) {
            registrations.retain(|r| r.request != request);
            if registrations.is_empty() {
                chats.remove(&request.chat_id);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn chat_count(&self) -> usize {
        self.chats().len()
    }
}

/// Receiving end of a registration; unregisters itself when dropped.
pub(crate) struct Listener<P> {
    request: RequestId,
    receiver: mpsc::UnboundedReceiver<Inbound<P>>,
    listeners: Listeners<P>,
}

impl<P> Listener<P> {
    /// Waits for the thumbnail, applying spoiler choices to `session` as they
    /// come in.
    pub(crate) async fn wait_for_thumbnail(&mut self, session: &mut Session, limit: Duration) -> Wait<P> {
        let deadline = tokio::time::sleep(limit);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                _ = &mut deadline => return Wait::TimedOut,
                inbound = self.receiver.recv() => match inbound {
                    Some(Inbound::Thumbnail(thumbnail)) => return Wait::Thumbnail(thumbnail),
                    Some(Inbound::Spoiler(spoiler)) => {
                        log::info!("Request {}: spoiler set to {}", self.request, spoiler);
                        session.set_spoiler(spoiler);
                    }
                    Some(Inbound::Cancel) | None => return Wait::Cancelled,
                },
            }
        }
    }

    /// Resolves once the request is cancelled. Anything else is ignored.
    pub(crate) async fn cancelled(&mut self) {
        loop {
            match self.receiver.recv().await {
                Some(Inbound::Cancel) | None => return,
                Some(_) => continue,
            }
        }
    }
}

impl<P> Drop for Listener<P> {
    fn drop(&mut self) {
        self.listeners.remove(self.request);
    }
}
