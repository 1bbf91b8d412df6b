//! Session description rewriting
//!
//! Hardware-only video codecs negotiate first on many devices but fail to
//! encode once the session starts. Before an offer or answer leaves this
//! side, every payload type mapped to a software-fallback-capable codec is
//! moved to the front of the video media line so the peer prefers it.

use std::collections::HashSet;

/// The video codec every target device can encode in software.
pub const FALLBACK_VIDEO_CODEC: &str = "VP8";

/// Reorder each `m=video` line so payload types mapped to `codec` come
/// first. Every other line passes through untouched; CRLF line endings are
/// preserved.
pub fn prefer_video_codec(sdp: &str, codec: &str) -> String {
    let preferred = payload_types_for(sdp, codec);
    if preferred.is_empty() {
        return sdp.to_string();
    }

    let lines: Vec<String> = sdp
        .split('\n')
        .map(|line| {
            let (body, had_cr) = match line.strip_suffix('\r') {
                Some(body) => (body, true),
                None => (line, false),
            };

            let rewritten = if body.starts_with("m=video ") {
                reorder_media_line(body, &preferred)
            } else {
                body.to_string()
            };

            if had_cr {
                format!("{}\r", rewritten)
            } else {
                rewritten
            }
        })
        .collect();

    lines.join("\n")
}

/// Payload types whose `a=rtpmap` entry names `codec`.
fn payload_types_for(sdp: &str, codec: &str) -> HashSet<String> {
    let mut found = HashSet::new();

    for line in sdp.lines() {
        let line = line.trim_end_matches('\r');
        if let Some(rest) = line.strip_prefix("a=rtpmap:") {
            // a=rtpmap:<payload> <encoding>/<clock>[/<params>]
            let mut parts = rest.splitn(2, ' ');
            let (Some(payload), Some(encoding)) = (parts.next(), parts.next()) else {
                continue;
            };
            let name = encoding.split('/').next().unwrap_or("");
            if name.eq_ignore_ascii_case(codec) {
                found.insert(payload.to_string());
            }
        }
    }

    found
}

/// `m=video <port> <proto> <pt> <pt> ...` with preferred payloads first,
/// each group keeping its original relative order.
fn reorder_media_line(line: &str, preferred: &HashSet<String>) -> String {
    let mut tokens = line.split_whitespace();
    let header: Vec<&str> = tokens.by_ref().take(3).collect();
    if header.len() < 3 {
        return line.to_string();
    }

    let payloads: Vec<&str> = tokens.collect();
    let (first, rest): (Vec<&str>, Vec<&str>) = payloads
        .iter()
        .partition(|pt| preferred.contains(**pt));

    let mut out = header;
    out.extend(first);
    out.extend(rest);
    out.join(" ")
}
