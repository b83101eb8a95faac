use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::provider::{IdentityProvider, SessionEvents};
use crate::state::{SessionState, Settlement};
use crate::types::{AuthChangeEvent, AuthStateChange, Session};

/// Passive path to `Ready`: the provider may finish its own fragment handling
/// before any explicit redemption call returns.
///
/// The subscription lives in a background task. Dropping the handle (or
/// calling [`ListenerHandle::unsubscribe`]) aborts it; it also ends on its own
/// after the first qualifying notification or once the state turns terminal.
pub struct SessionListener;

impl SessionListener {
    /// Subscribes now and spawns the listening task.
    ///
    /// Subscribing happens before this returns, so no notification sent
    /// afterwards is missed.
    #[must_use]
    pub fn spawn<P: IdentityProvider>(provider: &P, settlement: Arc<Settlement>) -> ListenerHandle {
        let events = provider.subscribe();
        let task = tokio::spawn(listen(events, settlement));
        ListenerHandle { task: Some(task) }
    }
}

async fn listen(mut events: SessionEvents, settlement: Arc<Settlement>) {
    let mut state = settlement.watch();
    if state.borrow_and_update().is_terminal() {
        return;
    }
    loop {
        tokio::select! {
            change = events.next() => {
                let Some(change) = change else {
                    tracing::debug!("Session event stream closed");
                    return;
                };
                if let Some(session) = qualifying_session(change) {
                    if settlement.settle(SessionState::Ready(session)) {
                        tracing::info!("Session established by provider notification");
                    }
                    return;
                }
            }
            changed = state.changed() => {
                if changed.is_err() || state.borrow_and_update().is_terminal() {
                    return;
                }
            }
        }
    }
}

fn qualifying_session(change: AuthStateChange) -> Option<Session> {
    match change.event {
        AuthChangeEvent::PasswordRecovery | AuthChangeEvent::SignedIn => change.session,
        _ => None,
    }
}

/// Owns the listening task. Dropping it unsubscribes.
#[derive(Debug)]
pub struct ListenerHandle {
    task: Option<JoinHandle<()>>,
}

impl ListenerHandle {
    pub fn unsubscribe(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
