// Shared test doubles for the serial console, flash tool and notification transport
#![allow(dead_code)]

use async_trait::async_trait;
use firmware_ci::flash::{FlashError, FlashOutcome, Flasher};
use firmware_ci::notify::{NotificationSource, NotifyError, TransportEvent};
use firmware_ci::serial::{SerialError, SerialInterface, SerialSession};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub enum Step {
    Line(&'static str),
    Silence,
    Fail,
}

/// Counters shared between a test and its scripted serial sessions.
#[derive(Debug, Default)]
pub struct SerialCounters {
    pub opens: AtomicUsize,
    pub reads: AtomicUsize,
    pub closes: AtomicUsize,
}

impl SerialCounters {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Every opened session plays the same script. Once the script runs out the
/// session either repeats `endless` forever or goes silent.
pub struct ScriptedSerial {
    script: Vec<Step>,
    endless: Option<&'static str>,
    pub counters: Arc<SerialCounters>,
}

impl ScriptedSerial {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            endless: None,
            counters: Arc::new(SerialCounters::default()),
        }
    }

    pub fn lines(lines: &[&'static str]) -> Self {
        Self::new(lines.iter().map(|l| Step::Line(*l)).collect())
    }

    pub fn endless(line: &'static str) -> Self {
        Self {
            script: Vec::new(),
            endless: Some(line),
            counters: Arc::new(SerialCounters::default()),
        }
    }
}

#[async_trait]
impl SerialInterface for ScriptedSerial {
    async fn open(
        &self,
        _port: &str,
        _baud: u32,
        _read_timeout: Duration,
    ) -> Result<Box<dyn SerialSession>, SerialError> {
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            steps: self.script.iter().cloned().collect(),
            endless: self.endless,
            counters: self.counters.clone(),
        }))
    }

    fn available_ports(&self) -> Vec<String> {
        vec!["/dev/ttyUSB0".to_string()]
    }
}

pub struct ScriptedSession {
    steps: VecDeque<Step>,
    endless: Option<&'static str>,
    counters: Arc<SerialCounters>,
}

#[async_trait]
impl SerialSession for ScriptedSession {
    async fn read_line(&mut self) -> Result<String, SerialError> {
        self.counters.reads.fetch_add(1, Ordering::SeqCst);
        match self.steps.pop_front() {
            Some(Step::Line(line)) => Ok(format!("{}\r\n", line)),
            Some(Step::Silence) => Ok(String::new()),
            Some(Step::Fail) => Err(SerialError::Read(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "device unplugged",
            ))),
            None => match self.endless {
                Some(line) => {
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    Ok(format!("{}\r\n", line))
                }
                None => Ok(String::new()),
            },
        }
    }

    async fn close(&mut self) {
        self.counters.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Flash tool that only counts invocations.
#[derive(Debug)]
pub struct CountingFlasher {
    pub calls: AtomicUsize,
    pub code: Option<i32>,
}

impl CountingFlasher {
    pub fn new(code: Option<i32>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            code,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Flasher for CountingFlasher {
    async fn flash(&self) -> Result<FlashOutcome, FlashError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(FlashOutcome { code: self.code })
    }
}

/// Replays a fixed sequence of transport events. Subscribing is only
/// accepted while the last replayed connection event left it connected.
pub struct MockSource {
    events: VecDeque<TransportEvent>,
    connected: bool,
    pub subscriptions: Arc<Mutex<Vec<String>>>,
    pub rejected: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new(events: Vec<TransportEvent>) -> Self {
        Self {
            events: events.into(),
            connected: false,
            subscriptions: Arc::new(Mutex::new(Vec::new())),
            rejected: Arc::new(AtomicUsize::new(0)),
        }
    }
}

#[async_trait]
impl NotificationSource for MockSource {
    async fn next_event(&mut self) -> Option<TransportEvent> {
        let event = self.events.pop_front()?;
        match &event {
            TransportEvent::ConnectionEstablished { .. } => self.connected = true,
            TransportEvent::Disconnected => self.connected = false,
            _ => {}
        }
        Some(event)
    }

    async fn subscribe(&self, channel: &str) -> Result<(), NotifyError> {
        if !self.connected {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(NotifyError::NotConnected);
        }
        self.subscriptions.lock().unwrap().push(channel.to_string());
        Ok(())
    }
}

pub fn deploy_payload(package: &str, version: &str) -> String {
    serde_json::json!({
        "package": { "name": package },
        "version": { "name": version },
    })
    .to_string()
}
