use std::io::{self, Read};

use reqwest::blocking::multipart::{Form, Part};
use zeroize::Zeroizing;

use super::agent::PdfResponse;
use super::http::{parse_json, JsonTransport};
use super::{BackendError, CertificateSigner, SignedPdf};
use crate::secret::{CertificateFile, SecretString};

/// Client for the remote PKCS#12 signing service.
///
/// The PDF and the certificate travel as multipart file parts; the password
/// as a text part. Secret parts are streamed from zeroized buffers owned by
/// this module. Chunks copied by the HTTP stack while writing the request
/// are outside its reach and are not zeroed.
pub struct HttpCertificateSigner {
    transport: JsonTransport,
}

impl HttpCertificateSigner {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, BackendError> {
        Ok(Self {
            transport: JsonTransport::new(base_url, timeout_secs)?,
        })
    }
}

fn file_part(bytes: &[u8], filename: &str, mime: &str) -> Result<Part, BackendError> {
    Part::bytes(bytes.to_vec())
        .file_name(filename.to_string())
        .mime_str(mime)
        .map_err(|e| BackendError::HttpClient(e.to_string()))
}

/// Reads a copy of a secret and zeroes it when the request body is dropped.
struct SecretReader {
    buf: Zeroizing<Vec<u8>>,
    pos: usize,
}

impl SecretReader {
    fn new(bytes: &[u8]) -> Self {
        Self {
            buf: Zeroizing::new(bytes.to_vec()),
            pos: 0,
        }
    }

    fn len(&self) -> u64 {
        self.buf.len() as u64
    }
}

impl Read for SecretReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.buf[self.pos..];
        let n = remaining.len().min(out.len());
        out[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

fn secret_part(bytes: &[u8]) -> Part {
    let reader = SecretReader::new(bytes);
    let len = reader.len();
    Part::reader_with_length(reader, len)
}

impl CertificateSigner for HttpCertificateSigner {
    fn sign_pdf(
        &self,
        pdf: &[u8],
        filename: &str,
        certificate: &CertificateFile,
        password: &SecretString,
    ) -> Result<SignedPdf, BackendError> {
        let form = Form::new()
            .part("pdf", file_part(pdf, filename, "application/pdf")?)
            .part(
                "certificate",
                secret_part(certificate.bytes())
                    .file_name(certificate.filename().to_string())
                    .mime_str("application/x-pkcs12")
                    .map_err(|e| BackendError::HttpClient(e.to_string()))?,
            )
            .part("password", secret_part(password.expose().as_bytes()));

        let request = self
            .transport
            .client()
            .post(self.transport.url("pades"))
            .multipart(form);
        let parsed: PdfResponse = parse_json(self.transport.send(request)?)?;
        parsed.into_signed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_parts_accept_known_mime_types() {
        assert!(file_part(b"%PDF", "rx.pdf", "application/pdf").is_ok());
        assert!(file_part(b"\x30\x82", "cert.pfx", "application/x-pkcs12").is_ok());
    }

    #[test]
    fn secret_reader_yields_every_byte_in_chunks() {
        let mut reader = SecretReader::new(b"pkcs12-payload");
        assert_eq!(reader.len(), 14);

        let mut chunk = [0u8; 4];
        let mut collected = Vec::new();
        loop {
            let n = reader.read(&mut chunk).unwrap();
            if n == 0 {
                break;
            }
            collected.extend_from_slice(&chunk[..n]);
        }
        assert_eq!(collected, b"pkcs12-payload");
    }

    #[test]
    fn unreachable_signer_reports_error() {
        let signer = HttpCertificateSigner::new("http://127.0.0.1:9", 2).unwrap();
        let cert = CertificateFile::new("cert.pfx", vec![1, 2, 3]);
        let result = signer.sign_pdf(b"%PDF", "rx.pdf", &cert, &SecretString::new("secret"));
        assert!(result.is_err());
    }
}
