use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use regex::Regex;
use tokio::sync::{mpsc, watch};

use super::bus::BusSource;
use super::storage_worker::{FlushBatch, StorageWorkerPool};
use super::types::{BusEvent, Direction, HttpFlow, HttpMessage};

/// Outcome of folding one event into the caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushRequest {
    None,
    /// Soft threshold reached, flush at the next opportunity.
    Requested,
    /// Hard ceiling reached, flush before accepting more events.
    Forced,
}

/// Correlates bus events into complete HTTP flows. Flow entries are keyed by
/// `flow_id` and enriched as request and response packets arrive; packets are
/// cached verbatim. Both caches drain to the storage worker pool on flush.
pub struct FlowReconstructor {
    app_uid: i64,
    flows: Mutex<HashMap<String, HttpFlow>>,
    packets: Mutex<Vec<HttpMessage>>,
    last_flush: Mutex<Instant>,
    soft_flush_count: usize,
    hard_cache_capacity: usize,
    flush_interval: Duration,
    // Matches fractional seconds after the time portion, plus a trailing
    // Zulu marker or numeric zone offset.
    ts_pattern: Regex,
}

impl FlowReconstructor {
    pub fn new(
        app_uid: i64,
        soft_flush_count: usize,
        hard_cache_capacity: usize,
        flush_interval: Duration,
    ) -> Self {
        Self {
            app_uid,
            flows: Mutex::new(HashMap::new()),
            packets: Mutex::new(Vec::new()),
            last_flush: Mutex::new(Instant::now()),
            soft_flush_count,
            hard_cache_capacity,
            flush_interval,
            ts_pattern: Regex::new(r"(\d{2}:\d{2}:\d{2})\.\d+|Z$|[+-]\d{2}:?\d{2}$").unwrap(),
        }
    }

    /// Strips fractional seconds and the zone suffix (`Z` or a numeric
    /// offset) so timestamps compare equal regardless of which publisher
    /// formatted them.
    fn normalize_timestamp(&self, raw: &str) -> String {
        self.ts_pattern.replace_all(raw, "$1").into_owned()
    }

    /// Folds one event into the caches and reports whether they need
    /// flushing.
    pub fn handle_event(&self, event: BusEvent) -> FlushRequest {
        match event {
            BusEvent::FlowInfo(mut flow) => {
                flow.start_time = self.normalize_timestamp(&flow.start_time);
                if flow.app_uid == 0 {
                    flow.app_uid = self.app_uid;
                }
                // Authoritative flow description replaces anything
                // synthesized from packets.
                self.flows
                    .lock()
                    .unwrap()
                    .insert(flow.flow_id.clone(), flow);
            }
            BusEvent::Packet(pkt) => {
                let mut message = pkt.message;
                message.timestamp = self.normalize_timestamp(&message.timestamp);
                {
                    let mut flows = self.flows.lock().unwrap();
                    match flows.get_mut(&message.flow_id) {
                        Some(flow) => {
                            // Packets enrich but never clobber flow_info fields.
                            if message.direction == Direction::Request {
                                if flow.method.is_empty() {
                                    if let Some(ref method) = pkt.method {
                                        flow.method = method.clone();
                                    }
                                }
                                if flow.url.is_empty() {
                                    if let Some(ref url) = pkt.url {
                                        flow.url = url.clone();
                                    }
                                }
                            } else {
                                if flow.status == 0 {
                                    if let Some(status) = pkt.status_code {
                                        flow.status = status;
                                    }
                                }
                                if flow.content_type.is_empty()
                                    && !message.content_type.is_empty()
                                {
                                    flow.content_type = message.content_type.clone();
                                }
                            }
                        }
                        None => {
                            // Packet arrived before (or without) its
                            // flow_info; synthesize a stub entry.
                            debug!("Synthesizing flow entry for {}", message.flow_id);
                            flows.insert(
                                message.flow_id.clone(),
                                self.synthesize_flow(
                                    &message,
                                    &pkt.method,
                                    &pkt.url,
                                    pkt.status_code,
                                ),
                            );
                        }
                    }
                }
                self.packets.lock().unwrap().push(message);
            }
        }

        // Thresholds are sized over the packet cache; flow entries are
        // bounded by it (at most one synthesized flow per packet).
        let cached = self.packets.lock().unwrap().len();
        if cached >= self.hard_cache_capacity {
            FlushRequest::Forced
        } else if cached >= self.soft_flush_count {
            FlushRequest::Requested
        } else {
            FlushRequest::None
        }
    }

    fn synthesize_flow(
        &self,
        message: &HttpMessage,
        method: &Option<String>,
        url: &Option<String>,
        status_code: Option<i64>,
    ) -> HttpFlow {
        HttpFlow {
            flow_id: message.flow_id.clone(),
            app_uid: self.app_uid,
            protocol: "TCP".to_string(),
            top_protocol: message.top_protocol.clone(),
            src_ip: String::new(),
            src_port: 0,
            dst_ip: String::new(),
            dst_port: 0,
            http_version: String::new(),
            host: String::new(),
            url: url.clone().unwrap_or_default(),
            method: method.clone().unwrap_or_default(),
            status: if message.direction == Direction::Response {
                status_code.unwrap_or(0)
            } else {
                0
            },
            content_type: if message.direction == Direction::Response {
                message.content_type.clone()
            } else {
                String::new()
            },
            start_time: message.timestamp.clone(),
        }
    }

    pub fn cache_size(&self) -> usize {
        self.flows.lock().unwrap().len() + self.packets.lock().unwrap().len()
    }

    pub fn flush_due(&self) -> bool {
        self.cache_size() > 0
            && self.last_flush.lock().unwrap().elapsed() >= self.flush_interval
    }

    /// Drains both caches into a batch and resets the flush clock.
    pub fn take_snapshot(&self) -> FlushBatch {
        let flows: Vec<HttpFlow> = {
            let mut flows = self.flows.lock().unwrap();
            flows.drain().map(|(_, v)| v).collect()
        };
        let packets: Vec<HttpMessage> = std::mem::take(&mut *self.packets.lock().unwrap());
        *self.last_flush.lock().unwrap() = Instant::now();
        if !flows.is_empty() || !packets.is_empty() {
            info!(
                "Flushing {} flow(s), {} packet(s)",
                flows.len(),
                packets.len()
            );
        }
        FlushBatch { flows, packets }
    }

    /// Consume loop: a dedicated OS thread polls the bus (whose connects and
    /// reads block) and feeds raw lines over a channel, while the async side
    /// folds events and drives the wall-clock flush independently of bus
    /// availability. A final flush runs on shutdown so nothing cached is
    /// lost.
    pub async fn run(
        self: Arc<Self>,
        bus: Box<dyn BusSource>,
        pool: Arc<StorageWorkerPool>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let running = Arc::new(AtomicBool::new(true));
        let (line_tx, mut line_rx) = mpsc::channel::<String>(256);
        let poll_handle = spawn_poll_thread(bus, line_tx, running.clone());

        let mut ticker = tokio::time::interval(Duration::from_millis(50));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                line = line_rx.recv() => {
                    let Some(raw) = line else { break };
                    match BusEvent::from_json(&raw) {
                        Ok(event) => {
                            if self.handle_event(event) != FlushRequest::None {
                                pool.submit(self.take_snapshot()).await;
                            }
                        }
                        Err(e) => warn!("Dropping bus message: {}", e),
                    }
                }
                _ = ticker.tick() => {
                    if self.flush_due() {
                        pool.submit(self.take_snapshot()).await;
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        running.store(false, Ordering::SeqCst);
        let _ = tokio::task::spawn_blocking(move || poll_handle.join()).await;
        // Fold anything the poll thread delivered before it stopped.
        while let Ok(raw) = line_rx.try_recv() {
            match BusEvent::from_json(&raw) {
                Ok(event) => {
                    self.handle_event(event);
                }
                Err(e) => warn!("Dropping bus message: {}", e),
            }
        }
        pool.submit(self.take_snapshot()).await;
        debug!("Flow reconstructor stopped");
    }
}

/// Owns the bus source on its own thread; the source's read timeouts bound
/// how long a stop request waits.
fn spawn_poll_thread(
    mut bus: Box<dyn BusSource>,
    tx: mpsc::Sender<String>,
    running: Arc<AtomicBool>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("bus-poll".to_string())
        .spawn(move || {
            while running.load(Ordering::SeqCst) {
                match bus.try_recv() {
                    Ok(Some(line)) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Ok(None) => thread::sleep(Duration::from_millis(10)),
                    Err(e) => {
                        debug!("Bus unavailable: {}", e);
                        thread::sleep(Duration::from_millis(200));
                    }
                }
            }
            debug!("Bus poll thread stopped");
        })
        .expect("failed to spawn bus poll thread")
}
