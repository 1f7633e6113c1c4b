pub mod postdata;
pub mod xml;

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use thiserror::Error;

use crate::fitbit::{FitbitChannel, FitbitError, TrackerInfo};
use crate::prefs::Preferences;
use crate::registry::{state, Registry};
use crate::util::base64;

use postdata::{parse_response_parts, PostData};
use xml::{parse_sync_response, SyncResponse};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fitbit(#[from] FitbitError),
    #[error("upload request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Xml(#[from] xml::XmlError),
}

/// A tracker op queued by the server for this sync session, decoded from its
/// `remoteOp` XML element. `op` is always exactly 7 bytes; anything longer in
/// the decoded opcode is silently truncated, matching the original's
/// fixed-size `b64decode(op->op, 7, ...)` destination buffer.
struct QueuedOp {
    op: [u8; 7],
    payload: Option<Vec<u8>>,
    encrypted: bool,
}

fn decode_queued_ops(resp: &SyncResponse) -> Vec<QueuedOp> {
    resp.remote_ops
        .iter()
        .filter_map(|remote_op| {
            let decoded = base64::decode_lenient(&remote_op.op_code_b64);
            if decoded.is_empty() {
                warn!("failed to decode op {}", remote_op.op_code_b64);
                return None;
            }
            let mut op = [0u8; 7];
            let n = decoded.len().min(7);
            op[..n].copy_from_slice(&decoded[..n]);

            let payload = remote_op
                .payload_b64
                .as_deref()
                .map(base64::decode_lenient)
                .filter(|p| !p.is_empty());

            Some(QueuedOp { op, payload, encrypted: remote_op.encrypted })
        })
        .collect()
}

/// Write the op/payload/response of one executed sync op under
/// `dump_directory/<serial>-<sync_time>/<op_num>-{op,payload,response}`, when
/// dumping is enabled.
fn dump_sync_op(
    dump_directory: Option<&Path>,
    serial: [u8; 5],
    sync_time: i64,
    op_num: usize,
    op: &[u8; 7],
    payload: Option<&[u8]>,
    response: &[u8],
) {
    let Some(dir) = dump_directory else { return };

    let base: PathBuf = dir
        .join(format!("{}-{}", hex::encode(serial), sync_time))
        .join(op_num.to_string());
    if let Some(parent) = base.parent() {
        if let Err(e) = fs::create_dir_all(parent) {
            error!("failed to create dump directory {}: {}", parent.display(), e);
            return;
        }
    }

    if let Err(e) = fs::write(format!("{}-op", base.display()), op) {
        error!("failed to dump op: {}", e);
    }
    if let Some(payload) = payload {
        if let Err(e) = fs::write(format!("{}-payload", base.display()), payload) {
            error!("failed to dump payload: {}", e);
        }
    }
    if let Err(e) = fs::write(format!("{}-response", base.display()), response) {
        error!("failed to dump response: {}", e);
    }
}

/// Run the full upload dialog for one synced tracker: POST standard fields
/// plus the previous response's echoed fields, run any server-queued ops,
/// base64 the results back, and follow `<response>` redirects until the
/// server stops handing us a new one.
pub fn sync_tracker(
    fb: &mut FitbitChannel,
    tracker: &TrackerInfo,
    prefs: &Preferences,
    registry: &Registry,
    http: &reqwest::blocking::Client,
    notify_state_change: impl Fn(),
) -> Result<(), SyncError> {
    info!("syncing tracker {}", tracker.serial_str);
    registry.record(tracker.serial, |d| d.state |= state::SYNCING);
    notify_state_change();

    let sync_time = crate::util::uptime::now();
    let mut tracker_id = String::new();
    let mut user_id = String::new();

    let mut url = prefs.upload_url.clone();
    let mut echo_body: Option<String> = None;
    let mut queued: Vec<QueuedOp> = Vec::new();
    let mut op_num = 0usize;

    loop {
        let mut pd = PostData::new();
        pd.append("beaconType", "standard");
        pd.append("clientMode", "standard");
        pd.append("clientVersion", &prefs.client_version);
        pd.append("os", &prefs.os_name);
        pd.append("clientId", &prefs.client_id);

        if let Some(body) = echo_body.take() {
            for (name, val) in parse_response_parts(&body) {
                if name == "trackerPublicId" {
                    tracker_id = val.clone();
                } else if name == "userPublicId" {
                    user_id = val.clone();
                }
                pd.append(&name, &val);
            }
            registry.record(tracker.serial, |d| {
                d.last_sync_time = sync_time;
                if !tracker_id.is_empty() {
                    d.tracker_id = tracker_id.clone();
                }
                if !user_id.is_empty() {
                    d.user_id = user_id.clone();
                }
            });
            notify_state_change();
        }

        for (op_idx, queued_op) in queued.drain(..).enumerate() {
            if queued_op.encrypted {
                warn!("op is encrypted - unimplemented!");
            }

            match fb.run_op(queued_op.op, queued_op.payload.as_deref(), 32768) {
                Ok(response) => {
                    dump_sync_op(
                        prefs.dump_directory.as_deref(),
                        tracker.serial,
                        sync_time,
                        op_num,
                        &queued_op.op,
                        queued_op.payload.as_deref(),
                        &response,
                    );
                    pd.append(&format!("opResponse[{op_idx}]"), &base64::encode(&response));
                    pd.append(&format!("opStatus[{op_idx}]"), "success");
                }
                Err(e) => {
                    error!("op {op_idx} failed: {e}");
                    pd.append(&format!("opStatus[{op_idx}]"), "error");
                }
            }
            op_num += 1;
        }

        debug!("POST {}", url);
        let body = http
            .post(&url)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(pd.into_string())
            .send()?
            .error_for_status()?
            .text()?;

        let parsed = parse_sync_response(&body)?;
        queued = decode_queued_ops(&parsed);

        match parsed.redirect.url {
            Some(next_url) => {
                echo_body = parsed.redirect.body;
                url = next_url;
            }
            None => break,
        }
    }

    info!("sync {} complete", tracker.serial_str);
    fb.tracker_sleep(prefs.sync_delay.as_secs() as u32)?;

    let final_time = crate::util::uptime::now();
    registry.record(tracker.serial, |d| {
        d.state &= !state::SYNCING;
        d.last_sync_time = final_time;
    });
    notify_state_change();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_well_formed_ops_and_drops_unparseable_ones() {
        let resp = SyncResponse {
            redirect: Default::default(),
            remote_ops: vec![
                xml::RemoteOp {
                    encrypted: false,
                    op_code_b64: base64::encode(&[0x24, 0, 0, 0, 0, 0, 0]),
                    payload_b64: None,
                },
                xml::RemoteOp {
                    encrypted: true,
                    op_code_b64: "".to_string(),
                    payload_b64: None,
                },
            ],
        };
        let ops = decode_queued_ops(&resp);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].op, [0x24, 0, 0, 0, 0, 0, 0]);
        assert!(!ops[0].encrypted);
    }
}
