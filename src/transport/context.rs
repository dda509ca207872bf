// src/transport/context.rs
use std::collections::HashMap;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, oneshot};

use crate::error::QueueError;

/// An in-process request: the encoded payload and a channel for the reply.
pub(crate) type InprocRequest = (Vec<u8>, oneshot::Sender<Vec<u8>>);

pub(crate) type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>>;

/// Transport context shared by every socket in a process.
///
/// Owns the registry behind `inproc://` endpoints. The context is an explicit
/// constructor argument everywhere; there is no process-global instance, so
/// two contexts give two fully isolated inproc namespaces.
#[derive(Clone, Default)]
pub struct Context {
    inproc: Arc<Mutex<HashMap<String, InprocEntry>>>,
}

enum InprocEntry {
    Pipeline(PipelineEntry),
    Request(RequestEntry),
}

struct PipelineEntry {
    // Sender clone kept so the channel survives until unbind.
    tx: mpsc::Sender<Vec<u8>>,
    rx: SharedReceiver,
    pullers: Arc<AtomicUsize>,
}

struct RequestEntry {
    tx: mpsc::Sender<InprocRequest>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn bind_pipeline(
        &self,
        address: &str,
        name: &str,
        hwm: usize,
    ) -> Result<(mpsc::Sender<Vec<u8>>, Arc<AtomicUsize>), QueueError> {
        let mut registry = self.inproc.lock().unwrap();
        if registry.contains_key(name) {
            return Err(QueueError::connection(address, "address already bound"));
        }
        let (tx, rx) = mpsc::channel(hwm.max(1));
        let pullers = Arc::new(AtomicUsize::new(0));
        registry.insert(
            name.to_string(),
            InprocEntry::Pipeline(PipelineEntry {
                tx: tx.clone(),
                rx: Arc::new(tokio::sync::Mutex::new(rx)),
                pullers: pullers.clone(),
            }),
        );
        Ok((tx, pullers))
    }

    pub(crate) fn connect_pipeline(
        &self,
        address: &str,
        name: &str,
    ) -> Result<(SharedReceiver, Arc<AtomicUsize>), QueueError> {
        let registry = self.inproc.lock().unwrap();
        match registry.get(name) {
            Some(InprocEntry::Pipeline(entry)) => Ok((entry.rx.clone(), entry.pullers.clone())),
            Some(InprocEntry::Request(_)) => Err(QueueError::connection(
                address,
                "endpoint is bound to the request pattern",
            )),
            None => Err(QueueError::connection(address, "nothing bound at address")),
        }
    }

    pub(crate) fn bind_request(
        &self,
        address: &str,
        name: &str,
        hwm: usize,
    ) -> Result<mpsc::Receiver<InprocRequest>, QueueError> {
        let mut registry = self.inproc.lock().unwrap();
        if registry.contains_key(name) {
            return Err(QueueError::connection(address, "address already bound"));
        }
        let (tx, rx) = mpsc::channel(hwm.max(1));
        registry.insert(name.to_string(), InprocEntry::Request(RequestEntry { tx }));
        Ok(rx)
    }

    pub(crate) fn connect_request(
        &self,
        address: &str,
        name: &str,
    ) -> Result<mpsc::Sender<InprocRequest>, QueueError> {
        let registry = self.inproc.lock().unwrap();
        match registry.get(name) {
            Some(InprocEntry::Request(entry)) => Ok(entry.tx.clone()),
            Some(InprocEntry::Pipeline(_)) => Err(QueueError::connection(
                address,
                "endpoint is bound to the pipeline pattern",
            )),
            None => Err(QueueError::connection(address, "nothing bound at address")),
        }
    }

    pub(crate) fn unbind(&self, name: &str) {
        self.inproc.lock().unwrap().remove(name);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bound = self.inproc.lock().unwrap().len();
        f.debug_struct("Context").field("inproc_bound", &bound).finish()
    }
}
