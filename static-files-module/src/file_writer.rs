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

//! Streaming a byte range of a file as the response body.

use bytes::BytesMut;
use log::{error, warn};
use module_utils::pingora::{Error, ErrorType, SessionWrapper};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

const CHUNK_SIZE: usize = 64 * 1024;

fn read_failure(path: &Path, action: &str, err: io::Error) -> Box<Error> {
    error!("failed {action} {}: {err}", path.display());
    Error::because(ErrorType::HTTPStatus(500), format!("failed {action} file"), err)
}

/// Sends the bytes `start` to `end` (inclusive) of a file and completes the response.
pub(crate) async fn file_response(
    session: &mut impl SessionWrapper,
    path: &Path,
    start: u64,
    end: u64,
) -> Result<(), Box<Error>> {
    let mut file = File::open(path).map_err(|err| read_failure(path, "opening", err))?;
    file.seek(SeekFrom::Start(start))
        .map_err(|err| read_failure(path, "seeking in", err))?;

    let mut remaining = end - start + 1;
    let mut reader = file.take(remaining);
    loop {
        let mut chunk = BytesMut::zeroed(CHUNK_SIZE);
        let len = reader
            .read(&mut chunk)
            .map_err(|err| read_failure(path, "reading from", err))?;
        if len == 0 {
            break;
        }

        chunk.truncate(len);
        remaining -= len as u64;
        session
            .write_response_body(Some(chunk.freeze()), remaining == 0)
            .await?;
    }

    if remaining > 0 {
        warn!(
            "{} shrank while being served, {remaining} bytes missing",
            path.display()
        );
        return Err(Error::explain(
            ErrorType::ReadError,
            "file truncated while being served",
        ));
    }

    Ok(())
}
