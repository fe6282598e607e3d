//! `process`: apply one change request read from stdin.

use crate::cli::CliContext;
use crate::constants;
use crate::core::audit_log::{self, AuditLog};
use crate::core::dispatch::{DispatchReport, RequestDispatcher};
use crate::core::error::{ErrorKind, SUCCESS_CODE};
use crate::models::request::ChangeRequest;
use anyhow::{bail, Context, Result};
use clap::Args;
use serde::Serialize;
use std::io::{self, Read};
use tracing::warn;
use zeroize::Zeroizing;

#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Skip the audit trail for this request
    #[arg(long)]
    pub no_audit: bool,
}

/// Printed to stdout. `compensation` appears only when an AddUser rollback
/// ran, so a failed rollback reaches the caller alongside the primary error.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct Response {
    pub code: i32,
    pub result: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compensation: Option<String>,
}

impl Response {
    pub fn from_result(result: Result<(), ErrorKind>) -> Self {
        let (code, result) = match result {
            Ok(()) => (SUCCESS_CODE, "ok"),
            Err(kind) => (kind.code(), kind.name()),
        };
        Self {
            code,
            result,
            compensation: None,
        }
    }

    pub fn from_report(report: &DispatchReport) -> Self {
        Self {
            compensation: report.compensation.as_ref().map(ToString::to_string),
            ..Self::from_result(report.result())
        }
    }
}

pub fn run(ctx: &CliContext, args: ProcessArgs) -> Result<()> {
    let raw = read_request(io::stdin().lock())?;
    let parsed = parse_request(&raw);
    drop(raw);

    let response = match parsed {
        Ok(request) => {
            let dispatcher = RequestDispatcher::from_config(&ctx.config);
            let report = dispatcher.run(request);
            if ctx.config.audit.enabled && !args.no_audit {
                let log = AuditLog::new(&ctx.config.audit.path);
                if let Err(e) = log.record(&report, &audit_log::detect_actor()) {
                    warn!(error = %format!("{:#}", e), "audit log write failed");
                }
            }
            Response::from_report(&report)
        }
        Err(e) => {
            warn!(error = %e, "rejecting malformed request");
            Response::from_result(Err(ErrorKind::InvalidRequest))
        }
    };

    println!("{}", serde_json::to_string(&response).context("serialize response")?);
    if response.code != SUCCESS_CODE {
        std::process::exit(1);
    }
    Ok(())
}

/// Read at most [`constants::MAX_REQUEST_BYTES`] from `input`.
fn read_request(input: impl Read) -> Result<Zeroizing<Vec<u8>>> {
    let mut buf = Zeroizing::new(Vec::new());
    input
        .take(constants::MAX_REQUEST_BYTES + 1)
        .read_to_end(&mut buf)
        .context("read request from stdin")?;
    if buf.len() as u64 > constants::MAX_REQUEST_BYTES {
        bail!("request exceeds {} bytes", constants::MAX_REQUEST_BYTES);
    }
    Ok(buf)
}

/// Parse errors never echo the input, which may hold passwords.
fn parse_request(raw: &[u8]) -> Result<ChangeRequest, String> {
    serde_json::from_slice(raw).map_err(|e| {
        format!("{:?} error at line {} column {}", e.classify(), e.line(), e.column())
    })
}
