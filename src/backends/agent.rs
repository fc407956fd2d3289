use serde::{Deserialize, Serialize};

use super::http::{decode_bytes, encode_bytes, JsonTransport};
use super::{
    AgentSignature, BackendError, DeviceAgent, FinalizeRequest, HashSignRequest, SignedPdf,
    TokenInfo,
};
use crate::config::HASH_ALGORITHM;

/// Client for the device agent running on the signer's machine.
pub struct HttpDeviceAgent {
    transport: JsonTransport,
}

impl HttpDeviceAgent {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self, BackendError> {
        Ok(Self {
            transport: JsonTransport::new(base_url, timeout_secs)?,
        })
    }
}

#[derive(Deserialize)]
struct TokensResponse {
    #[serde(default)]
    tokens: Vec<TokenInfo>,
}

#[derive(Serialize)]
struct SignHashBody<'a> {
    hash: &'a str,
    hash_algorithm: &'static str,
    format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pin: Option<&'a str>,
}

#[derive(Serialize)]
struct FinalizeBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    record_id: Option<&'a str>,
    pdf_base64: String,
    signature: &'a str,
    certificate: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    certificate_subject: Option<&'a str>,
    pre_hash: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct PdfResponse {
    pub pdf_base64: String,
    #[serde(default)]
    pub filename: Option<String>,
}

impl PdfResponse {
    pub(crate) fn into_signed(self) -> Result<SignedPdf, BackendError> {
        Ok(SignedPdf {
            bytes: decode_bytes(&self.pdf_base64)?,
            filename: self.filename,
        })
    }
}

impl DeviceAgent for HttpDeviceAgent {
    fn detect_tokens(&self) -> Result<Vec<TokenInfo>, BackendError> {
        let parsed: TokensResponse = self.transport.get_json("tokens")?;
        tracing::debug!(count = parsed.tokens.len(), "Device agent token scan");
        Ok(parsed.tokens)
    }

    fn sign_hash(&self, request: &HashSignRequest<'_>) -> Result<AgentSignature, BackendError> {
        let body = SignHashBody {
            hash: request.hash,
            hash_algorithm: HASH_ALGORITHM,
            format: request.format.as_str(),
            token_id: request.token_id,
            pin: request.pin.map(|p| p.expose()),
        };
        self.transport.post_json("sign", &body)
    }

    fn finalize(&self, request: &FinalizeRequest<'_>) -> Result<SignedPdf, BackendError> {
        let body = FinalizeBody {
            record_id: request.record_id.map(|id| id.as_str()),
            pdf_base64: encode_bytes(request.pdf),
            signature: request.signature,
            certificate: request.certificate,
            certificate_subject: request.certificate_subject,
            pre_hash: request.pre_hash,
        };
        let parsed: PdfResponse = self.transport.post_json("finalize", &body)?;
        parsed.into_signed()
    }
}
