//! Showing pairing QR codes to the operator.

use std::io::Write;

use tracing::{info, warn};

/// A QR code the protocol client wants scanned.
#[derive(Debug, Clone, PartialEq)]
pub struct QrCode {
    /// Raw payload encoded in the code.
    pub payload: String,
    /// Pre-rendered terminal art, when the client provides one.
    pub rendered: Option<String>,
}

/// Sink for pairing QR codes.
pub trait QrDisplay: Send + Sync {
    fn show(&self, qr: &QrCode);
}

/// Prints QR codes to stdout.
#[derive(Debug, Default)]
pub struct TerminalQrDisplay;

impl QrDisplay for TerminalQrDisplay {
    fn show(&self, qr: &QrCode) {
        info!("Scan the QR code with WhatsApp (Linked devices > Link a device)");

        let mut stdout = std::io::stdout().lock();
        let result = match &qr.rendered {
            Some(art) => writeln!(stdout, "\n{art}"),
            None => writeln!(
                stdout,
                "\nQR payload (render it with any QR tool):\n{}\n",
                qr.payload
            ),
        };
        if let Err(e) = result.and_then(|()| stdout.flush()) {
            warn!(error = %e, "Failed to print QR code");
        }
    }
}
