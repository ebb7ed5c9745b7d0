//! Tokio driver for a [`Session`].
//!
//! The driver owns the session inside one task and performs the I/O its
//! actions ask for:
//!
//! - `OpenChannel` / `SendFrame` / `CloseChannel` go to the [`Socket`] opened
//!   by the [`Connector`]
//! - `Call` runs on a spawned task against the [`GameApi`]; the answer comes
//!   back through a completion channel
//! - `Notify` and view changes are published on a bounded update channel
//!
//! One `tokio::select!` multiplexes player intents, REST completions, socket
//! frames and the tick timer, so the session only ever sees one event at a
//! time.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use sleuth_core::{
    Environment, Notice, RequestId, Session, SessionAction, SessionError, SessionEvent,
    SessionIdentity, SessionView,
};
use sleuth_proto::{ApiError, ApiRequest, ApiResponse};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::{
    config::ClientConfig,
    error::{DriverError, TransportError},
    transport::{ABNORMAL_CLOSE, Connector, GameApi, Inbound, Socket},
};

type Completion = (RequestId, Result<ApiResponse, ApiError>);

/// Something the embedder should render or report.
#[derive(Debug)]
pub enum DriverUpdate {
    /// The session view changed.
    View(Box<SessionView>),
    /// A notice for the player.
    Notice(Notice),
    /// An intent was refused; nothing was sent.
    Rejected(SessionError),
}

/// Handle to a running driver.
#[derive(Debug)]
pub struct DriverHandle {
    intents: mpsc::UnboundedSender<SessionEvent>,
    task: JoinHandle<Result<(), DriverError>>,
}

impl DriverHandle {
    /// Queue a player intent.
    ///
    /// # Errors
    ///
    /// Returns `DriverError::Stopped` if the driver task has exited.
    pub fn send(&self, event: SessionEvent) -> Result<(), DriverError> {
        self.intents.send(event).map_err(|_| DriverError::Stopped)
    }

    /// Disconnect and wait for the driver task to finish.
    ///
    /// # Errors
    ///
    /// Returns the error the driver stopped with, or `DriverError::Stopped`
    /// if the task panicked or was cancelled.
    pub async fn shutdown(self) -> Result<(), DriverError> {
        drop(self.intents);
        match self.task.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "driver task failed");
                Err(DriverError::Stopped)
            },
        }
    }
}

/// Runs a session against real collaborators.
///
/// # Type Parameters
///
/// - `E`: Environment implementation for time
/// - `A`: REST collaborator
/// - `C`: realtime socket factory
pub struct Driver<E: Environment, A, C> {
    env: E,
    session: Session<E>,
    api: Arc<A>,
    connector: C,
    url: String,
    tick_interval: Duration,
    next_tick: E::Instant,
    socket: Option<Box<dyn Socket>>,
    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
    updates: mpsc::Sender<DriverUpdate>,
    last_view: Option<SessionView>,
}

impl<E, A, C> Driver<E, A, C>
where
    E: Environment,
    A: GameApi,
    C: Connector,
{
    /// Spawn the driver task and return a handle plus the update receiver.
    ///
    /// The driver connects the realtime channel and fetches state right away.
    #[must_use = "the update receiver must be used to receive updates"]
    pub fn start(
        config: ClientConfig,
        env: E,
        api: A,
        connector: C,
    ) -> (DriverHandle, mpsc::Receiver<DriverUpdate>) {
        let (intents_tx, intents_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let (updates_tx, updates_rx) = mpsc::channel(config.update_capacity.max(1));

        let identity = SessionIdentity::new(config.game_id, config.player_id);
        let driver = Self {
            session: Session::new(env.clone(), identity, config.session),
            next_tick: env.now() + config.tick_interval,
            env,
            api: Arc::new(api),
            connector,
            url: config.channel_url(),
            tick_interval: config.tick_interval,
            socket: None,
            completions_tx,
            completions_rx,
            updates: updates_tx,
            last_view: None,
        };

        let task = tokio::spawn(driver.run(intents_rx));
        (DriverHandle { intents: intents_tx, task }, updates_rx)
    }

    async fn run(
        mut self,
        mut intents: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Result<(), DriverError> {
        info!(url = %self.url, "driver started");
        self.process(SessionEvent::Connect).await?;
        self.process(SessionEvent::Refresh).await?;

        loop {
            let until_tick = self.next_tick - self.env.now();
            let event = tokio::select! {
                intent = intents.recv() => match intent {
                    Some(event) => event,
                    None => {
                        debug!("intent channel closed, shutting down");
                        self.process(SessionEvent::Disconnect).await?;
                        break;
                    },
                },
                Some((id, result)) = self.completions_rx.recv() => {
                    SessionEvent::Response { id, result }
                },
                inbound = next_inbound(&mut self.socket) => match inbound {
                    Ok(Inbound::Text(text)) => SessionEvent::FrameReceived(text),
                    Ok(Inbound::Closed { code }) => {
                        self.socket = None;
                        SessionEvent::ChannelClosed { code }
                    },
                    Err(e) => {
                        warn!(error = %e, "socket failed");
                        self.socket = None;
                        SessionEvent::ChannelClosed { code: ABNORMAL_CLOSE }
                    },
                },
                () = self.env.sleep(until_tick) => {
                    self.next_tick = self.env.now() + self.tick_interval;
                    SessionEvent::Tick
                },
            };
            self.process(event).await?;
        }

        info!("driver stopped");
        Ok(())
    }

    /// Feed `event` and everything its actions produce through the session.
    async fn process(&mut self, event: SessionEvent) -> Result<(), DriverError> {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            let actions = match self.session.handle(event) {
                Ok(actions) => actions,
                Err(e) if e.is_fatal() => {
                    error!(error = %e, "session failed");
                    return Err(e.into());
                },
                Err(e) => {
                    debug!(error = %e, "intent rejected");
                    self.publish(DriverUpdate::Rejected(e));
                    continue;
                },
            };

            for action in actions {
                if let Some(next) = self.execute(action).await {
                    queue.push_back(next);
                }
            }
        }

        self.publish_view();
        Ok(())
    }

    async fn execute(&mut self, action: SessionAction) -> Option<SessionEvent> {
        match action {
            SessionAction::OpenChannel { game_id, player_id } => {
                debug!(game_id, player_id, url = %self.url, "opening socket");
                match self.connector.connect(&self.url).await {
                    Ok(socket) => {
                        self.socket = Some(socket);
                        Some(SessionEvent::ChannelOpened)
                    },
                    Err(e) => {
                        warn!(error = %e, "connect failed");
                        Some(SessionEvent::ChannelClosed { code: ABNORMAL_CLOSE })
                    },
                }
            },
            SessionAction::SendFrame(text) => {
                let Some(socket) = self.socket.as_mut() else {
                    debug!("no socket, frame dropped");
                    return None;
                };
                if let Err(e) = socket.send(text).await {
                    warn!(error = %e, "send failed, dropping socket");
                    self.socket = None;
                    return Some(SessionEvent::ChannelClosed { code: ABNORMAL_CLOSE });
                }
                None
            },
            SessionAction::CloseChannel { code } => {
                if let Some(mut socket) = self.socket.take()
                    && let Err(e) = socket.close(code).await
                {
                    debug!(code, error = %e, "close failed");
                }
                None
            },
            SessionAction::Call { id, request } => {
                self.spawn_call(id, request);
                None
            },
            SessionAction::Notify(notice) => {
                self.publish(DriverUpdate::Notice(notice));
                None
            },
        }
    }

    fn spawn_call(&self, id: RequestId, request: ApiRequest) {
        let api = Arc::clone(&self.api);
        let completions = self.completions_tx.clone();
        tokio::spawn(async move {
            let result = api.call(request).await;
            if completions.send((id, result)).is_err() {
                debug!(%id, "driver gone, response dropped");
            }
        });
    }

    fn publish_view(&mut self) {
        let view = self.session.view();
        if self.last_view.as_ref() == Some(&view) {
            return;
        }
        self.last_view = Some(view.clone());
        self.publish(DriverUpdate::View(Box::new(view)));
    }

    /// Publish without blocking the loop. A full channel drops the update.
    fn publish(&self, update: DriverUpdate) {
        match self.updates.try_send(update) {
            Ok(()) => {},
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(update = ?dropped, "update channel full, dropping update");
            },
            Err(mpsc::error::TrySendError::Closed(_)) => {
                debug!("update channel closed, receiver dropped");
            },
        }
    }
}

async fn next_inbound(socket: &mut Option<Box<dyn Socket>>) -> Result<Inbound, TransportError> {
    match socket {
        Some(socket) => socket.recv().await,
        None => std::future::pending().await,
    }
}
