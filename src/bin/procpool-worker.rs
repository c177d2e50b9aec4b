//! Reference worker speaking the procpool stdio contract.
//!
//! Serves as executable documentation of the child side of the protocol and
//! as the fixture for the integration tests. Modes:
//!
//! - `echo`: reply with the request payload verbatim (default)
//! - `sleep <ms>`: sleep before echoing; exercises timeouts
//! - `http`: decode an `HttpRequest`, reply 200 with echoed headers and a
//!   JSON rendering of the request
//! - `jobs`: decode a `JobRequest`; `echo` jobs get an encoded
//!   `JobResponse`, everything else the bare reply `ok`
//! - `badboot`: write a failure banner instead of the handshake and exit
//!
//! All modes exit cleanly on an empty length line (the shutdown signal).

use std::collections::BTreeMap;
use std::io::{self, BufRead, Read, Write};
use std::time::Duration;

use serde::Serialize;

use procpool::wire::{HttpRequest, HttpResponse, JobRequest, JobResponse, Message};

const PIPE_CHUNK_SIZE: usize = 2048;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let mode = args.get(1).map(String::as_str).unwrap_or("echo").to_string();
    let sleep_ms: u64 = args
        .get(2)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(1000);

    if let Err(err) = serve(&mode, sleep_ms) {
        eprintln!("procpool-worker: {err}");
        std::process::exit(1);
    }
}

fn serve(mode: &str, sleep_ms: u64) -> io::Result<()> {
    let mut input = io::stdin().lock();
    let mut output = io::stdout().lock();

    if mode == "badboot" {
        output.write_all(b"fatal: refusing to boot\nconfig not found\n")?;
        output.flush()?;
        return Ok(());
    }

    output.write_all(b"ok\n")?;
    output.flush()?;

    while let Some(msg) = read_message(&mut input)? {
        let reply = match mode {
            "echo" => msg,
            "sleep" => {
                std::thread::sleep(Duration::from_millis(sleep_ms));
                msg
            }
            "http" => handle_http(&msg)?,
            "jobs" => handle_job(&msg)?,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unknown mode {other:?}"),
                ))
            }
        };
        write_message(&mut output, &reply)?;
    }
    Ok(())
}

/// JSON view of one uploaded file, matching the reply shape front-ends
/// assert on.
#[derive(Serialize)]
struct FileJson {
    filename: String,
    size: u64,
    #[serde(rename = "tmpPath")]
    tmp_path: String,
}

fn handle_http(msg: &[u8]) -> io::Result<Vec<u8>> {
    let req = HttpRequest::from_slice(msg).map_err(to_io)?;
    let files: BTreeMap<String, FileJson> = req
        .files
        .iter()
        .map(|(name, file)| {
            (
                name.clone(),
                FileJson {
                    filename: file.filename.clone(),
                    size: file.size,
                    tmp_path: file.tmp_path.clone(),
                },
            )
        })
        .collect();
    let body = serde_json::json!({
        "body": String::from_utf8_lossy(&req.body),
        "files": files,
        "form": req.form,
    });
    let resp = HttpResponse {
        status_code: 200,
        headers: req.headers,
        body: serde_json::to_vec(&body)?.into(),
    };
    Ok(resp.to_bytes().to_vec())
}

fn handle_job(msg: &[u8]) -> io::Result<Vec<u8>> {
    let req = JobRequest::from_slice(msg).map_err(to_io)?;
    if req.name == "echo" {
        let resp = JobResponse {
            payload: req.payload,
        };
        return Ok(resp.to_bytes().to_vec());
    }
    eprintln!("running job {}...", req.name);
    Ok(b"ok".to_vec())
}

fn to_io(err: procpool::PoolError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err.to_string())
}

/// Read one frame; `Ok(None)` means EOF or the shutdown signal.
fn read_message<R: BufRead>(input: &mut R) -> io::Result<Option<Vec<u8>>> {
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let line = line.trim_end_matches('\n');
    if line.is_empty() {
        return Ok(None);
    }
    let len: usize = line
        .parse()
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "bad length prefix"))?;

    let mut msg = vec![0u8; len];
    let mut read = 0;
    while read < len {
        let want = (len - read).min(PIPE_CHUNK_SIZE);
        input.read_exact(&mut msg[read..read + want])?;
        read += want;
    }
    Ok(Some(msg))
}

fn write_message<W: Write>(output: &mut W, msg: &[u8]) -> io::Result<()> {
    output.write_all(format!("{}\n", msg.len()).as_bytes())?;
    for chunk in msg.chunks(PIPE_CHUNK_SIZE) {
        output.write_all(chunk)?;
    }
    output.flush()
}
