// Copyright 2024 Wladimir Palant
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Write-through output wrapper flushing on a fixed cadence.

use log::debug;
use std::fmt::Debug;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

/// An output that buffers written data until it is explicitly flushed
pub trait FlushSink: Send + 'static {
    /// Appends data to the output.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Transmits all data written so far.
    fn flush(&mut self) -> io::Result<()>;
}

/// Wraps a [`FlushSink`], passing writes through immediately but coalescing flushes onto a
/// timer.
///
/// Writes and flushes are serialized by a lock, so a flush tick never interleaves with a
/// partial write. The periodic flushing stops after [`PacedWriter::stop`] is called, when a
/// flush fails or when the writer is dropped.
pub struct PacedWriter<S> {
    sink: Arc<Mutex<S>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: FlushSink> PacedWriter<S> {
    /// Wraps a sink, flushing it every `latency`.
    ///
    /// This has to be called within a Tokio runtime.
    pub fn new(sink: S, latency: Duration) -> Self {
        let sink = Arc::new(Mutex::new(sink));
        let ticker = tokio::spawn(flush_periodically(sink.clone(), latency));
        Self {
            sink,
            ticker: Mutex::new(Some(ticker)),
        }
    }

    /// Writes data to the underlying sink.
    pub fn write(&self, data: &[u8]) -> io::Result<()> {
        lock(&self.sink)?.write(data)
    }

    /// Flushes the underlying sink right away, regardless of the timer.
    pub fn flush(&self) -> io::Result<()> {
        lock(&self.sink)?.flush()
    }

    /// Stops periodic flushing.
    ///
    /// No timed flush will happen once this returns. Calling it again does nothing.
    pub async fn stop(&self) {
        let ticker = match self.ticker.lock() {
            Ok(mut ticker) => ticker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        if let Some(ticker) = ticker {
            ticker.abort();
            // Cancellation takes effect at the next suspension point, wait for it
            let _ = ticker.await;
        }
    }
}

impl<S> Drop for PacedWriter<S> {
    fn drop(&mut self) {
        let ticker = match self.ticker.get_mut() {
            Ok(ticker) => ticker.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(ticker) = ticker {
            ticker.abort();
        }
    }
}

impl<S> Debug for PacedWriter<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let running = self
            .ticker
            .lock()
            .map(|ticker| ticker.is_some())
            .unwrap_or(false);
        f.debug_struct("PacedWriter")
            .field("running", &running)
            .finish()
    }
}

fn lock<S>(sink: &Mutex<S>) -> io::Result<MutexGuard<'_, S>> {
    sink.lock()
        .map_err(|_| io::Error::new(io::ErrorKind::Other, "output lock poisoned"))
}

async fn flush_periodically<S: FlushSink>(sink: Arc<Mutex<S>>, latency: Duration) {
    let mut interval = time::interval_at(Instant::now() + latency, latency);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        if let Err(err) = lock(&sink).and_then(|mut sink| sink.flush()) {
            debug!("periodic flush failed, stopping: {err}");
            break;
        }
    }
}
