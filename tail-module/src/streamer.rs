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

//! The tail session state machine: copies appended file data to the client until the file
//! goes away or no new data arrives for too long.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};
use module_utils::pingora::{Error, ErrorType};
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{self, Instant};

use crate::paced_writer::{FlushSink, PacedWriter};
use crate::watcher::{FileWatcher, NotifyWatcher, WatchEvent};

const READ_SIZE: usize = 64 * 1024;

/// Timing and buffering parameters of a tail session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailSettings {
    /// Time without new data after which the connection is dropped
    pub idle_timeout: Duration,
    /// Interval at which written data is sent to the client
    pub flush_interval: Duration,
    /// Amount of unsent data that triggers sending before the next flush interval
    pub max_buffered: usize,
    /// Poll the file system with this interval instead of relying on native notifications
    pub poll_interval: Option<Duration>,
}

impl Default for TailSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(60),
            flush_interval: Duration::from_millis(50),
            max_buffered: READ_SIZE,
            poll_interval: None,
        }
    }
}

/// The reason a tail session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// No new data for the duration of the idle timeout
    TimedOut,
    /// The file was moved away
    Renamed,
    /// The file was deleted or cannot be accessed any more
    Removed,
    /// Sending data to the client failed
    WriteFailed,
}

impl Termination {
    /// Whether the response can be completed normally after the session ended this way.
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Renamed | Self::Removed)
    }
}

/// Destination of the streamed data
#[async_trait]
pub trait TailOutput: Send {
    /// Sends a chunk of data to the client.
    async fn write_chunk(&mut self, chunk: Bytes) -> Result<(), Box<Error>>;
}

/// Sink collecting written data, flushing hands it over to the session loop as a chunk.
#[derive(Debug)]
pub(crate) struct ChannelSink {
    buffer: BytesMut,
    sender: UnboundedSender<Bytes>,
    max_buffered: usize,
}

impl ChannelSink {
    pub(crate) fn new(max_buffered: usize) -> (Self, UnboundedReceiver<Bytes>) {
        let (sender, receiver) = unbounded_channel();
        let sink = Self {
            buffer: BytesMut::new(),
            sender,
            max_buffered,
        };
        (sink, receiver)
    }
}

impl FlushSink for ChannelSink {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() >= self.max_buffered {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let chunk = self.buffer.split().freeze();
        self.sender
            .send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "tail session is gone"))
    }
}

/// A file being tailed
#[derive(Debug)]
pub struct TailSession<W = NotifyWatcher> {
    path: PathBuf,
    file: File,
    cursor: u64,
    watcher: W,
    settings: TailSettings,
}

impl TailSession {
    /// Opens a file for tailing and starts watching it.
    ///
    /// Streaming starts at `offset` or at the current end of the file if no offset is given.
    /// An offset beyond the end of the file is reduced to the current file size.
    pub async fn open(
        path: &Path,
        offset: Option<u64>,
        settings: TailSettings,
    ) -> Result<Self, Box<Error>> {
        let file = File::open(path).await.map_err(|err| {
            Error::because(
                ErrorType::FileOpenError,
                "Failed to setup file tailer",
                err,
            )
        })?;
        let watcher = NotifyWatcher::watch(path, settings.poll_interval).map_err(|err| {
            Error::because(
                ErrorType::InternalError,
                "Failed to setup file tailer",
                err,
            )
        })?;
        Self::with_watcher(path, file, offset, watcher, settings).await
    }
}

impl<W: FileWatcher> TailSession<W> {
    /// Creates a tail session for an already opened file and a custom watcher.
    pub async fn with_watcher(
        path: &Path,
        mut file: File,
        offset: Option<u64>,
        watcher: W,
        settings: TailSettings,
    ) -> Result<Self, Box<Error>> {
        let size = file
            .metadata()
            .await
            .map_err(|err| {
                Error::because(ErrorType::FileReadError, "Failed to setup file tailer", err)
            })?
            .len();
        let cursor = offset.map_or(size, |offset| offset.min(size));
        file.seek(SeekFrom::Start(cursor)).await.map_err(|err| {
            Error::because(ErrorType::FileReadError, "Failed to setup file tailer", err)
        })?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            cursor,
            watcher,
            settings,
        })
    }

    /// Current read position in the file.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Streams file data to the output until the session terminates.
    ///
    /// Data already present after the start position is sent right away. After a clean
    /// termination all remaining data has been passed to the output. File and watch are
    /// released when this returns, regardless of the outcome.
    pub async fn run(mut self, output: &mut impl TailOutput) -> Termination {
        let (sink, mut chunks) = ChannelSink::new(self.settings.max_buffered);
        let writer = PacedWriter::new(sink, self.settings.flush_interval);

        let termination = self.stream(&writer, &mut chunks, output).await;
        self.watcher.close();
        writer.stop().await;

        if termination == Termination::WriteFailed {
            return termination;
        }

        if let Err(err) = writer.flush() {
            debug!("final flush for {} failed: {err}", self.path.display());
            return Termination::WriteFailed;
        }
        chunks.close();
        while let Some(chunk) = chunks.recv().await {
            if let Err(err) = output.write_chunk(chunk).await {
                debug!("client went away while tailing {}: {err}", self.path.display());
                return Termination::WriteFailed;
            }
        }

        termination
    }

    async fn stream(
        &mut self,
        writer: &PacedWriter<ChannelSink>,
        chunks: &mut UnboundedReceiver<Bytes>,
        output: &mut impl TailOutput,
    ) -> Termination {
        if let Err(termination) = self.copy_available(writer, chunks, output).await {
            return termination;
        }

        let idle_timeout = self.settings.idle_timeout;
        let idle = time::sleep(idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;

                Some(chunk) = chunks.recv() => {
                    if let Err(err) = output.write_chunk(chunk).await {
                        debug!("client went away while tailing {}: {err}", self.path.display());
                        return Termination::WriteFailed;
                    }
                }
                event = self.watcher.next_event() => match event {
                    Some(WatchEvent::Modified) => match self.refresh(writer, chunks, output).await {
                        Ok(0) => {}
                        Ok(_) => idle.as_mut().reset(Instant::now() + idle_timeout),
                        Err(termination) => return termination,
                    },
                    Some(WatchEvent::Renamed) => {
                        info!("{} was renamed, ending tail", self.path.display());
                        return Termination::Renamed;
                    }
                    Some(WatchEvent::Removed) => {
                        info!("{} was removed, ending tail", self.path.display());
                        return Termination::Removed;
                    }
                    Some(WatchEvent::Error(err)) => {
                        warn!("error watching {}: {err}", self.path.display());
                    }
                    None => {
                        info!("watch for {} ended, ending tail", self.path.display());
                        return Termination::Removed;
                    }
                },
                () = &mut idle => {
                    info!("no new data in {} for {idle_timeout:?}, closing connection", self.path.display());
                    return Termination::TimedOut;
                }
            }
        }
    }

    /// Checks the file after a change notification and copies new data.
    async fn refresh(
        &mut self,
        writer: &PacedWriter<ChannelSink>,
        chunks: &mut UnboundedReceiver<Bytes>,
        output: &mut impl TailOutput,
    ) -> Result<u64, Termination> {
        let size = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata.len(),
            Err(err) => {
                info!("{} is gone, ending tail: {err}", self.path.display());
                return Err(Termination::Removed);
            }
        };

        if size < self.cursor {
            // Data already sent stays sent, reading resumes once the file grows past the cursor
            info!(
                "{} shrank to {size} bytes, below the {} bytes already sent",
                self.path.display(),
                self.cursor
            );
            return Ok(0);
        }

        self.copy_available(writer, chunks, output).await
    }

    /// Copies everything from the cursor to the end of file into the writer.
    ///
    /// Chunks that are ready to be sent are passed on to the output in between reads, so a
    /// slow client holds up reading the file rather than data piling up in memory.
    async fn copy_available(
        &mut self,
        writer: &PacedWriter<ChannelSink>,
        chunks: &mut UnboundedReceiver<Bytes>,
        output: &mut impl TailOutput,
    ) -> Result<u64, Termination> {
        let mut buf = vec![0; READ_SIZE];
        let mut copied = 0;
        loop {
            let read = match self.file.read(&mut buf).await {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) => {
                    warn!("failed reading {}: {err}", self.path.display());
                    return Err(Termination::Removed);
                }
            };

            if let Err(err) = writer.write(&buf[..read]) {
                debug!("failed buffering data from {}: {err}", self.path.display());
                return Err(Termination::WriteFailed);
            }
            self.cursor += read as u64;
            copied += read as u64;

            while let Ok(chunk) = chunks.try_recv() {
                if let Err(err) = output.write_chunk(chunk).await {
                    debug!("client went away while tailing {}: {err}", self.path.display());
                    return Err(Termination::WriteFailed);
                }
            }
        }
        Ok(copied)
    }
}
