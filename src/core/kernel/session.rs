use crate::core::errors::ExchangeError;
use crate::core::kernel::codec::{ChannelData, ChannelSubscription, StreamMessage, WsCodec};
use crate::core::kernel::order_book::{
    ApplyOutcome, BookDepth, BookKey, BookMessage, OrderBookRegistry, OrderBookSynchronizer,
};
use crate::core::kernel::signer::PayloadSigner;
use crate::core::kernel::subscription::{Operation, SubscriptionPlanner, SubscriptionRequest};
use crate::core::kernel::ws::{WsReader, WsTransport, WsWriter};
use crate::core::types::{FundingUpdate, Instrument, Match, PairFormat, RiskUpdate};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, instrument, trace, warn};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Interval between keepalive pings
    pub keepalive_interval: Duration,
    /// Capacity of the outbound frame queue
    pub outbound_buffer: usize,
    /// Capacity of the event stream; events beyond it are dropped, never waited on
    pub event_buffer: usize,
    /// Sign control frames when a signer is installed
    pub authenticate: bool,
    /// Re-request a snapshot (unsubscribe + subscribe) after a sequence gap
    pub resubscribe_on_gap: bool,
    /// Out-of-order updates held per instrument before forcing a resnapshot
    pub reorder_window: usize,
    pub pair_format: PairFormat,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(10),
            outbound_buffer: 256,
            event_buffer: 1024,
            authenticate: false,
            resubscribe_on_gap: true,
            reorder_window: 0,
            pair_format: PairFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    ReadLoopActive,
    ShuttingDown,
}

/// Everything the read loop reports to the owner of the session
#[derive(Debug)]
pub enum SessionEvent {
    Subscribed(Vec<ChannelSubscription>),
    Unsubscribed(Vec<ChannelSubscription>),
    Instruments(Instrument),
    Match(Match),
    Funding(FundingUpdate),
    Risk(RiskUpdate),
    BookUpdated { key: BookKey, sequence: u64 },
    /// Data frame on a channel nobody handles
    Unhandled { channel: String },
    /// Frame with an unknown outer type tag
    Unrecognized { tag: String },
    /// Venue rejects, sequence gaps, decode and transport failures
    Error(ExchangeError),
    Disconnected { reason: String },
}

type Acknowledged = Arc<RwLock<BTreeMap<String, BTreeSet<String>>>>;

/// Plans, signs, encodes and queues control frames
struct Outbound<C: WsCodec> {
    codec: Arc<C>,
    signer: Option<Arc<dyn PayloadSigner>>,
    authenticate: bool,
    planner: SubscriptionPlanner,
    queue: mpsc::Sender<Message>,
}

impl<C: WsCodec> Clone for Outbound<C> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
            signer: self.signer.clone(),
            authenticate: self.authenticate,
            planner: self.planner,
            queue: self.queue.clone(),
        }
    }
}

impl<C: WsCodec> Outbound<C> {
    async fn submit(
        &self,
        requests: &[SubscriptionRequest],
        operation: Operation,
    ) -> Result<usize, ExchangeError> {
        let payloads = self.planner.plan(requests, operation)?;
        let count = payloads.len();

        for mut payload in payloads {
            match (&self.signer, self.authenticate) {
                (Some(signer), true) => {
                    let now = chrono::Utc::now().timestamp_millis().max(0) as u64;
                    signer.sign_payload(&mut payload, now)?;
                }
                (None, true) => debug!("authentication enabled without credentials, sending unsigned"),
                _ => {}
            }

            let message = self.codec.encode_payload(&payload)?;
            self.queue.send(message).await.map_err(|_| {
                ExchangeError::NetworkError("outbound queue closed".to_string())
            })?;
        }

        Ok(count)
    }
}

/// Why the session's tasks were told to stop
#[derive(Debug, Clone, PartialEq, Eq)]
enum Halt {
    Running,
    Requested,
    Failed(String),
}

type HaltSender = Arc<watch::Sender<Halt>>;

/// Stop both tasks with `reason` unless something already stopped them
fn fail(halt: &HaltSender, reason: String) {
    halt.send_if_modified(|current| {
        if *current == Halt::Running {
            *current = Halt::Failed(reason);
            true
        } else {
            false
        }
    });
}

fn halt_reason(halt: &watch::Receiver<Halt>) -> String {
    match &*halt.borrow() {
        Halt::Failed(reason) => reason.clone(),
        Halt::Running | Halt::Requested => "shutdown requested".to_string(),
    }
}

/// One venue WebSocket connection.
///
/// `connect` dials the transport and starts one writer task (outbound queue
/// plus keepalive pings) and one reader task. The reader decodes frames,
/// tracks acknowledged subscriptions, feeds the order book synchronizers and
/// reports everything else on the event stream. A closed socket or a failed
/// read or send ends the session; reconnecting is left to whoever owns it.
pub struct ConnectionSession<T: WsTransport, C: WsCodec> {
    venue: String,
    transport: T,
    codec: Arc<C>,
    signer: Option<Arc<dyn PayloadSigner>>,
    config: SessionConfig,
    order_books: OrderBookRegistry,
    acknowledged: Acknowledged,
    state: Arc<watch::Sender<SessionState>>,
    outbound: Option<Outbound<C>>,
    shutdown: Option<HaltSender>,
    tasks: Vec<JoinHandle<()>>,
    events_tx: mpsc::Sender<SessionEvent>,
    events_rx: Option<mpsc::Receiver<SessionEvent>>,
}

impl<T: WsTransport, C: WsCodec> ConnectionSession<T, C> {
    pub fn new(venue: impl Into<String>, transport: T, codec: C, config: SessionConfig) -> Self {
        let (events_tx, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let (state, _) = watch::channel(SessionState::Disconnected);

        Self {
            venue: venue.into(),
            transport,
            codec: Arc::new(codec),
            signer: None,
            config,
            order_books: OrderBookRegistry::new(),
            acknowledged: Arc::default(),
            state: Arc::new(state),
            outbound: None,
            shutdown: None,
            tasks: Vec::new(),
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn PayloadSigner>) -> Self {
        self.signer = Some(signer);
        self
    }

    /// Publish books into a registry shared with other sessions
    pub fn with_order_books(mut self, registry: OrderBookRegistry) -> Self {
        self.order_books = registry;
        self
    }

    pub fn venue(&self) -> &str {
        &self.venue
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn order_books(&self) -> &OrderBookRegistry {
        &self.order_books
    }

    /// Take the event stream; only the first caller gets it
    pub fn take_events(&mut self) -> Option<mpsc::Receiver<SessionEvent>> {
        self.events_rx.take()
    }

    /// Channels the venue has acknowledged, with their instruments
    pub fn acknowledged(&self) -> Vec<ChannelSubscription> {
        self.acknowledged
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(channel, instruments)| ChannelSubscription {
                channel: channel.clone(),
                instruments: instruments.iter().cloned().collect(),
            })
            .collect()
    }

    /// Dial the venue, start the read loop and subscribe to `initial`
    #[instrument(skip(self, initial), fields(venue = %self.venue, endpoint = %self.transport.endpoint()))]
    pub async fn connect(&mut self, initial: &[SubscriptionRequest]) -> Result<(), ExchangeError> {
        match self.state() {
            SessionState::Disconnected => self.reap().await,
            state => {
                return Err(ExchangeError::NetworkError(format!(
                    "cannot connect while {:?}",
                    state
                )))
            }
        }

        self.state.send_replace(SessionState::Connecting);
        let (writer, reader) = match self.transport.dial().await {
            Ok(halves) => halves,
            Err(e) => {
                error!(error = %e, "dial failed");
                self.state.send_replace(SessionState::Disconnected);
                return Err(e);
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(Halt::Running);
        let shutdown_tx = Arc::new(shutdown_tx);
        let (queue_tx, queue_rx) = mpsc::channel(self.config.outbound_buffer.max(1));

        let outbound = Outbound {
            codec: self.codec.clone(),
            signer: self.signer.clone(),
            authenticate: self.config.authenticate,
            planner: SubscriptionPlanner::new(self.config.pair_format),
            queue: queue_tx,
        };

        let read_loop = ReadLoop {
            venue: self.venue.clone(),
            codec: self.codec.clone(),
            outbound: outbound.clone(),
            level1: OrderBookSynchronizer::new(
                self.venue.clone(),
                BookDepth::Level1,
                self.order_books.clone(),
            )
            .with_reorder_window(self.config.reorder_window),
            level2: OrderBookSynchronizer::new(
                self.venue.clone(),
                BookDepth::Level2,
                self.order_books.clone(),
            )
            .with_reorder_window(self.config.reorder_window),
            acknowledged: self.acknowledged.clone(),
            events: self.events_tx.clone(),
            resubscribe_on_gap: self.config.resubscribe_on_gap,
            state: self.state.clone(),
            shutdown: shutdown_tx.clone(),
        };

        self.state.send_replace(SessionState::ReadLoopActive);
        self.tasks.push(tokio::spawn(run_writer(
            writer,
            queue_rx,
            shutdown_tx.clone(),
            shutdown_rx.clone(),
            self.config.keepalive_interval,
            self.events_tx.clone(),
        )));
        self.tasks
            .push(tokio::spawn(read_loop.run(reader, shutdown_rx)));

        self.outbound = Some(outbound);
        self.shutdown = Some(shutdown_tx);
        info!("session connected");

        if !initial.is_empty() {
            self.subscribe(initial).await?;
        }
        Ok(())
    }

    fn outbound(&self) -> Result<&Outbound<C>, ExchangeError> {
        match (&self.outbound, self.state()) {
            (Some(outbound), SessionState::ReadLoopActive) => Ok(outbound),
            (_, state) => Err(ExchangeError::NetworkError(format!(
                "session not connected ({:?})",
                state
            ))),
        }
    }

    /// Send the SUBSCRIBE payloads planned from `requests`; returns how many
    #[instrument(skip(self, requests), fields(venue = %self.venue, requests = requests.len()))]
    pub async fn subscribe(&self, requests: &[SubscriptionRequest]) -> Result<usize, ExchangeError> {
        self.outbound()?.submit(requests, Operation::Subscribe).await
    }

    /// Send the UNSUBSCRIBE payloads planned from `requests`; returns how many
    #[instrument(skip(self, requests), fields(venue = %self.venue, requests = requests.len()))]
    pub async fn unsubscribe(
        &self,
        requests: &[SubscriptionRequest],
    ) -> Result<usize, ExchangeError> {
        self.outbound()?
            .submit(requests, Operation::Unsubscribe)
            .await
    }

    /// Stop both tasks and wait for them to finish
    #[instrument(skip(self), fields(venue = %self.venue))]
    pub async fn shutdown(&mut self) -> Result<(), ExchangeError> {
        if self.shutdown.is_some() {
            self.state.send_replace(SessionState::ShuttingDown);
        }
        self.reap().await;
        self.state.send_replace(SessionState::Disconnected);
        Ok(())
    }

    async fn reap(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            shutdown.send_replace(Halt::Requested);
        }
        self.outbound = None;

        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!(error = %e, "session task ended abnormally");
            }
        }
    }
}

impl<T: WsTransport, C: WsCodec> Drop for ConnectionSession<T, C> {
    fn drop(&mut self) {
        if let Some(shutdown) = &self.shutdown {
            shutdown.send_replace(Halt::Requested);
        }
    }
}

async fn run_writer<W: WsWriter>(
    mut writer: W,
    mut queue: mpsc::Receiver<Message>,
    halt: HaltSender,
    mut shutdown: watch::Receiver<Halt>,
    keepalive: Duration,
    events: mpsc::Sender<SessionEvent>,
) {
    let mut ticker = interval_at(Instant::now() + keepalive, keepalive);

    loop {
        let result = tokio::select! {
            _ = shutdown.changed() => break,
            message = queue.recv() => match message {
                Some(message) => writer.send(message).await,
                None => break,
            },
            _ = ticker.tick() => {
                trace!("sending keepalive ping");
                writer.send(Message::Ping(Vec::new())).await
            }
        };

        if let Err(e) = result {
            error!(error = %e, "send failed, stopping session");
            let reason = format!("send failed: {}", e);
            let _ = events.try_send(SessionEvent::Error(e));
            fail(&halt, reason);
            break;
        }
    }

    if let Err(e) = writer.close().await {
        debug!(error = %e, "close frame not delivered");
    }
}

struct ReadLoop<C: WsCodec> {
    venue: String,
    codec: Arc<C>,
    outbound: Outbound<C>,
    level1: OrderBookSynchronizer,
    level2: OrderBookSynchronizer,
    acknowledged: Acknowledged,
    events: mpsc::Sender<SessionEvent>,
    resubscribe_on_gap: bool,
    state: Arc<watch::Sender<SessionState>>,
    shutdown: HaltSender,
}

impl<C: WsCodec> ReadLoop<C> {
    async fn run<R: WsReader>(mut self, mut reader: R, mut shutdown: watch::Receiver<Halt>) {
        let reason = loop {
            tokio::select! {
                _ = shutdown.changed() => break halt_reason(&shutdown),
                frame = reader.next_frame() => match frame {
                    Some(Ok(Message::Close(frame))) => break format!("closed by venue: {:?}", frame),
                    Some(Ok(Message::Text(text))) if text.is_empty() => break "empty frame".to_string(),
                    Some(Ok(Message::Binary(data))) if data.is_empty() => break "empty frame".to_string(),
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(message)) => self.handle(message).await,
                    Some(Err(e)) => break format!("receive failed: {}", e),
                    None => break "connection closed".to_string(),
                },
            }
        };

        let requested = *shutdown.borrow() == Halt::Requested;
        if requested {
            info!(venue = %self.venue, "read loop stopped");
        } else {
            warn!(venue = %self.venue, reason = %reason, "read loop ended, session disconnected");
            fail(&self.shutdown, reason.clone());
            self.state.send_replace(SessionState::Disconnected);
        }
        self.emit(SessionEvent::Disconnected { reason });
    }

    fn emit(&self, event: SessionEvent) {
        if let Err(mpsc::error::TrySendError::Full(event)) = self.events.try_send(event) {
            warn!(venue = %self.venue, ?event, "event buffer full, dropping event");
        }
    }

    async fn handle(&mut self, message: Message) {
        match self.codec.decode_message(message) {
            Ok(Some(decoded)) => self.dispatch(decoded).await,
            Ok(None) => {}
            Err(e) => {
                warn!(venue = %self.venue, error = %e, "failed to decode frame");
                self.emit(SessionEvent::Error(e));
            }
        }
    }

    async fn dispatch(&mut self, message: StreamMessage) {
        match message {
            StreamMessage::Subscribed(channels) => {
                {
                    let mut acknowledged = self
                        .acknowledged
                        .write()
                        .unwrap_or_else(PoisonError::into_inner);
                    for subscription in &channels {
                        acknowledged
                            .entry(subscription.channel.clone())
                            .or_default()
                            .extend(subscription.instruments.iter().cloned());
                    }
                }
                debug!(venue = %self.venue, ?channels, "subscription acknowledged");
                self.emit(SessionEvent::Subscribed(channels));
            }
            StreamMessage::Unsubscribed(channels) => {
                {
                    let mut acknowledged = self
                        .acknowledged
                        .write()
                        .unwrap_or_else(PoisonError::into_inner);
                    for subscription in &channels {
                        let emptied = acknowledged.get_mut(&subscription.channel).map_or(false, |held| {
                            if subscription.instruments.is_empty() {
                                held.clear();
                            }
                            for instrument in &subscription.instruments {
                                held.remove(instrument);
                            }
                            held.is_empty()
                        });
                        if emptied {
                            acknowledged.remove(&subscription.channel);
                        }
                    }
                }
                debug!(venue = %self.venue, ?channels, "unsubscription acknowledged");
                self.emit(SessionEvent::Unsubscribed(channels));
            }
            StreamMessage::Rejected { message, reason } => {
                warn!(venue = %self.venue, %message, %reason, "venue rejected request");
                self.emit(SessionEvent::Error(ExchangeError::ProtocolReject {
                    message,
                    reason,
                }));
            }
            StreamMessage::Data(data) => self.route(data).await,
            StreamMessage::Heartbeat => trace!(venue = %self.venue, "heartbeat"),
            StreamMessage::Unrecognized { tag, raw } => {
                warn!(venue = %self.venue, %tag, %raw, "unrecognized message type");
                self.emit(SessionEvent::Unrecognized { tag });
            }
        }
    }

    async fn route(&mut self, data: ChannelData) {
        match data {
            ChannelData::Instruments(instrument) => self.emit(SessionEvent::Instruments(instrument)),
            ChannelData::Matches(trade) => self.emit(SessionEvent::Match(trade)),
            ChannelData::Funding(funding) => self.emit(SessionEvent::Funding(funding)),
            ChannelData::Risk(risk) => self.emit(SessionEvent::Risk(risk)),
            ChannelData::Level1(book) => self.apply_book(BookDepth::Level1, book).await,
            ChannelData::Level2(book) => self.apply_book(BookDepth::Level2, book).await,
            ChannelData::Unhandled { channel, raw } => {
                warn!(venue = %self.venue, %channel, %raw, "unhandled message");
                self.emit(SessionEvent::Unhandled { channel });
            }
        }
    }

    async fn apply_book(&mut self, depth: BookDepth, message: BookMessage) {
        let instrument = message.instrument().to_string();
        let synchronizer = match depth {
            BookDepth::Level1 => &mut self.level1,
            BookDepth::Level2 => &mut self.level2,
        };

        match synchronizer.apply(message) {
            Ok(ApplyOutcome::Applied { sequence }) => self.emit(SessionEvent::BookUpdated {
                key: BookKey::new(self.venue.clone(), instrument, depth),
                sequence,
            }),
            Ok(ApplyOutcome::Buffered { .. } | ApplyOutcome::AwaitingSnapshot) => {}
            Err(e) => {
                self.emit(SessionEvent::Error(e));
                if self.resubscribe_on_gap {
                    self.request_snapshot(depth, &instrument).await;
                }
            }
        }
    }

    async fn request_snapshot(&self, depth: BookDepth, instrument: &str) {
        let channel = self.codec.book_channel(depth);
        let instruments = [instrument];
        info!(venue = %self.venue, %channel, %instrument, "requesting fresh snapshot");

        let result = async {
            self.outbound
                .submit(
                    &[SubscriptionRequest::unsubscribe(channel, &instruments)],
                    Operation::Unsubscribe,
                )
                .await?;
            self.outbound
                .submit(
                    &[SubscriptionRequest::subscribe(channel, &instruments)],
                    Operation::Subscribe,
                )
                .await
        }
        .await;

        if let Err(e) = result {
            error!(venue = %self.venue, error = %e, "failed to request snapshot");
            self.emit(SessionEvent::Error(e));
        }
    }
}
