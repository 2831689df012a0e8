//! Detached RSA-PSS signatures embedded in a PDF's byte layout
//!
//! The document is treated as an opaque byte buffer. Signing appends one
//! signature object in front of the final `%%EOF`:
//!
//! ```text
//! ... original body ...
//! N 0 obj
//! <<
//! /Type /Sig
//! ...
//! /ByteRange [0000000000 0000000000 0000000000 0000000000]
//! /Contents <000...000>
//! ...
//! >>
//! endobj
//! %%EOF
//! ```
//!
//! Both placeholders are fixed width and are patched in place, so the
//! document length never changes after the object is appended. The signed
//! bytes are everything except the `<...>` hex field.

use std::ops::Range;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use rsa::pss::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding, Verifier};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use svault_core::{VaultError, VaultResult};
use tracing::{debug, warn};

const EOF_MARKER: &[u8] = b"%%EOF";
const SIG_MARKER: &[u8] = b"/Type /Sig";
const BYTE_RANGE_KEY: &[u8] = b"/ByteRange";
const CONTENTS_KEY: &[u8] = b"/Contents";

/// Bytes after the last `/Type /Sig` searched for the dictionary entries
pub const SEARCH_WINDOW: usize = 1000;

/// Zero-padded width of each ByteRange integer
const RANGE_DIGITS: usize = 10;

fn malformed(msg: &str) -> VaultError {
    VaultError::MalformedDocument(msg.to_string())
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).rposition(|w| w == needle)
}

/// Offsets of the two patchable fields of a signature dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignaturePlacement {
    /// Offset of the `[` opening the ByteRange array
    pub byte_range_start: usize,
    /// One past the closing `]`
    pub byte_range_end: usize,
    /// Offset of the `<` opening the Contents hex string
    pub contents_start: usize,
    /// Offset of the closing `>`
    pub contents_end: usize,
}

impl SignaturePlacement {
    /// Find the fields of the most recent signature dictionary.
    pub fn locate(pdf: &[u8]) -> VaultResult<Self> {
        let sig = rfind(pdf, SIG_MARKER)
            .ok_or_else(|| malformed("signature dictionary not found"))?;
        let window = &pdf[sig..pdf.len().min(sig + SEARCH_WINDOW)];

        let byte_range = find(window, BYTE_RANGE_KEY)
            .ok_or_else(|| malformed("ByteRange not found in signature dictionary"))?;
        let contents = find(window, CONTENTS_KEY)
            .ok_or_else(|| malformed("Contents not found in signature dictionary"))?;

        let byte_range_start = find(&window[byte_range..], b"[")
            .map(|i| sig + byte_range + i)
            .ok_or_else(|| malformed("ByteRange array not found"))?;
        let byte_range_end = find(&pdf[byte_range_start..], b"]")
            .map(|i| byte_range_start + i + 1)
            .ok_or_else(|| malformed("ByteRange array is not terminated"))?;

        let contents_start = find(&window[contents..], b"<")
            .map(|i| sig + contents + i)
            .ok_or_else(|| malformed("Contents opening delimiter not found"))?;
        let contents_end = find(&pdf[contents_start..], b">")
            .map(|i| contents_start + i)
            .ok_or_else(|| malformed("Contents closing delimiter not found"))?;

        Ok(Self {
            byte_range_start,
            byte_range_end,
            contents_start,
            contents_end,
        })
    }

    /// `[0, lt, gt + 1, len - (gt + 1)]`: the whole document minus the
    /// delimited hex field.
    pub fn byte_range(&self, doc_len: usize) -> [usize; 4] {
        let after = self.contents_end + 1;
        [0, self.contents_start, after, doc_len.saturating_sub(after)]
    }

    /// The hex digits between `<` and `>`.
    pub fn hex_field(&self) -> Range<usize> {
        self.contents_start + 1..self.contents_end
    }
}

fn render_byte_range(range: &[usize; 4]) -> VaultResult<String> {
    let parts: Vec<String> = range
        .iter()
        .map(|n| format!("{n:0width$}", width = RANGE_DIGITS))
        .collect();
    if parts.iter().any(|p| p.len() > RANGE_DIGITS) {
        return Err(malformed("document too large for ByteRange"));
    }
    Ok(format!("[{}]", parts.join(" ")))
}

fn parse_byte_range(field: &[u8]) -> VaultResult<[usize; 4]> {
    let text = std::str::from_utf8(field).map_err(|_| malformed("ByteRange is not ASCII"))?;
    let inner = text
        .strip_prefix('[')
        .and_then(|t| t.strip_suffix(']'))
        .ok_or_else(|| malformed("ByteRange is not an array"))?;

    let values = inner
        .split_whitespace()
        .map(|v| v.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| malformed("ByteRange holds a non-integer"))?;
    values
        .try_into()
        .map_err(|_| malformed("ByteRange must hold four integers"))
}

/// The two spans named by `range`, concatenated.
fn signed_content(pdf: &[u8], range: &[usize; 4]) -> VaultResult<Vec<u8>> {
    let span = |start: usize, len: usize| {
        start
            .checked_add(len)
            .and_then(|end| pdf.get(start..end))
            .ok_or_else(|| malformed("ByteRange points outside the document"))
    };
    let first = span(range[0], range[1])?;
    let second = span(range[2], range[3])?;

    let mut content = Vec::with_capacity(first.len() + second.len());
    content.extend_from_slice(first);
    content.extend_from_slice(second);
    Ok(content)
}

/// Signs PDFs with a Contents placeholder sized for one RSA modulus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PdfSigner {
    modulus_bytes: usize,
}

impl PdfSigner {
    pub fn for_key_bits(bits: usize) -> Self {
        Self {
            modulus_bytes: bits.div_ceil(8),
        }
    }

    pub fn for_key(key: &RsaPublicKey) -> Self {
        Self {
            modulus_bytes: key.size(),
        }
    }

    /// Hex digits reserved for the signature.
    pub fn contents_width(&self) -> usize {
        self.modulus_bytes * 2
    }

    /// Fail with `SignatureCapacity` if a key of `modulus_bytes` would not
    /// fit the placeholder.
    pub fn check_capacity(&self, modulus_bytes: usize) -> VaultResult<()> {
        let needed = modulus_bytes * 2;
        let capacity = self.contents_width();
        if needed > capacity {
            return Err(VaultError::SignatureCapacity { needed, capacity });
        }
        Ok(())
    }

    /// The object appended in front of `%%EOF`, placeholders zeroed.
    ///
    /// The object number is always six digits and the timestamp fields are
    /// fixed width, so the length depends only on `contents_width`.
    pub fn signature_object(&self, object_number: u32, signed_at: DateTime<Utc>) -> Vec<u8> {
        let zero_range = vec!["0".repeat(RANGE_DIGITS); 4].join(" ");
        format!(
            "\n{object_number} 0 obj\n<<\n\
             /Type /Sig\n\
             /Filter /Adobe.PPKLite\n\
             /SubFilter /adbe.pkcs7.detached\n\
             /Name (SecureVault{millis})\n\
             /ByteRange [{zero_range}]\n\
             /Contents <{contents}>\n\
             /M (D:{time}Z)\n\
             /Reason (SecureVault Digital Signature)\n\
             /Location (Secure Storage)\n\
             /ContactInfo (Secure Document Storage System)\n\
             >>\nendobj\n",
            millis = signed_at.timestamp_millis(),
            contents = "0".repeat(self.contents_width()),
            time = signed_at.format("%Y%m%d%H%M%S"),
        )
        .into_bytes()
    }

    /// Append a signature object and sign everything outside its hex field.
    pub fn sign(&self, pdf: &[u8], key: &RsaPrivateKey) -> VaultResult<Vec<u8>> {
        self.check_capacity(key.size())?;

        let eof = rfind(pdf, EOF_MARKER).ok_or_else(|| malformed("missing %%EOF marker"))?;
        let object_number = OsRng.gen_range(100_000..1_000_000);
        let object = self.signature_object(object_number, Utc::now());

        let mut doc = Vec::with_capacity(eof + object.len() + EOF_MARKER.len() + 1);
        doc.extend_from_slice(&pdf[..eof]);
        doc.extend_from_slice(&object);
        doc.extend_from_slice(EOF_MARKER);
        doc.push(b'\n');
        let doc_len = doc.len();

        let placement = SignaturePlacement::locate(&doc)?;
        let range = placement.byte_range(doc_len);

        let rendered = render_byte_range(&range)?;
        let byte_range_field = placement.byte_range_start..placement.byte_range_end;
        if rendered.len() != byte_range_field.len() {
            return Err(malformed("ByteRange placeholder has an unexpected width"));
        }
        doc[byte_range_field].copy_from_slice(rendered.as_bytes());

        let content = signed_content(&doc, &range)?;
        let signature = SigningKey::<Sha256>::new(key.clone())
            .try_sign_with_rng(&mut OsRng, &content)
            .map_err(|e| VaultError::Crypto(format!("PSS signing failed: {e}")))?;
        let signature_hex = hex::encode(signature.to_vec());

        let field = placement.hex_field();
        if signature_hex.len() > field.len() {
            return Err(VaultError::SignatureCapacity {
                needed: signature_hex.len(),
                capacity: field.len(),
            });
        }
        doc[field.start..field.start + signature_hex.len()]
            .copy_from_slice(signature_hex.as_bytes());

        debug_assert_eq!(doc.len(), doc_len);
        debug!(
            input_len = pdf.len(),
            output_len = doc_len,
            signed_len = content.len(),
            "signed PDF"
        );
        Ok(doc)
    }

    /// Check the most recent embedded signature against `key`.
    ///
    /// Structural problems are `MalformedDocument`; a well-formed signature
    /// that does not match is `Ok(false)`.
    pub fn verify(pdf: &[u8], key: &RsaPublicKey) -> VaultResult<bool> {
        let placement = SignaturePlacement::locate(pdf)?;
        let range =
            parse_byte_range(&pdf[placement.byte_range_start..placement.byte_range_end])?;

        if range != placement.byte_range(pdf.len()) {
            warn!(?range, "ByteRange does not cover the document");
            return Ok(false);
        }

        let decoded = hex::decode(&pdf[placement.hex_field()])
            .map_err(|_| malformed("signature field is not hex"))?;

        // Strip the zero padding after the modulus-sized signature
        let modulus = key.size();
        if decoded.len() < modulus || decoded[modulus..].iter().any(|&b| b != 0) {
            debug!(field_len = decoded.len(), modulus, "signature length mismatch");
            return Ok(false);
        }
        let Ok(signature) = Signature::try_from(&decoded[..modulus]) else {
            return Ok(false);
        };

        let content = signed_content(pdf, &range)?;
        let valid = VerifyingKey::<Sha256>::new(key.clone())
            .verify(&content, &signature)
            .is_ok();
        debug!(valid, signed_len = content.len(), "verified PDF signature");
        Ok(valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::test_keys;
    use chrono::TimeZone;

    const MINIMAL_PDF: &[u8] = b"%PDF-1.4\n\
        1 0 obj\n<< /Type /Catalog /Pages 2 0 R >>\nendobj\n\
        2 0 obj\n<< /Type /Pages /Kids [] /Count 0 >>\nendobj\n\
        trailer\n<< /Root 1 0 R >>\n\
        %%EOF\n";

    fn signer() -> PdfSigner {
        PdfSigner::for_key(&RsaPublicKey::from(test_keys::private_key()))
    }

    fn public() -> RsaPublicKey {
        RsaPublicKey::from(test_keys::private_key())
    }

    #[test]
    fn test_sign_verify() {
        let signed = signer().sign(MINIMAL_PDF, test_keys::private_key()).unwrap();
        assert!(PdfSigner::verify(&signed, &public()).unwrap());
    }

    #[test]
    fn test_verify_other_key_false() {
        let signed = signer().sign(MINIMAL_PDF, test_keys::private_key()).unwrap();
        let other = RsaPublicKey::from(test_keys::other_private_key());
        assert!(!PdfSigner::verify(&signed, &other).unwrap());
    }

    #[test]
    fn test_flipped_byte_outside_contents_false() {
        let signed = signer().sign(MINIMAL_PDF, test_keys::private_key()).unwrap();
        let placement = SignaturePlacement::locate(&signed).unwrap();

        // One byte in the original body, one in the trailing `endobj`
        for index in [20, signed.len() - 10] {
            assert!(!placement.hex_field().contains(&index));
            let mut tampered = signed.clone();
            tampered[index] ^= 0x01;
            assert!(
                !PdfSigner::verify(&tampered, &public()).unwrap(),
                "byte {index}"
            );
        }
    }

    #[test]
    fn test_signed_layout() {
        let signer = signer();
        let signed = signer.sign(MINIMAL_PDF, test_keys::private_key()).unwrap();

        assert!(signed.ends_with(b"%%EOF\n"));
        assert!(find(&signed, SIG_MARKER).is_some());

        let eof = rfind(MINIMAL_PDF, EOF_MARKER).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let object_len = signer.signature_object(123_456, at).len();
        assert_eq!(signed.len(), eof + object_len + b"%%EOF\n".len());
    }

    #[test]
    fn test_byte_range_excludes_hex_field() {
        let signed = signer().sign(MINIMAL_PDF, test_keys::private_key()).unwrap();
        let placement = SignaturePlacement::locate(&signed).unwrap();
        let stored = parse_byte_range(
            &signed[placement.byte_range_start..placement.byte_range_end],
        )
        .unwrap();

        assert_eq!(stored[0], 0);
        assert_eq!(signed[stored[1]], b'<');
        assert_eq!(signed[stored[2] - 1], b'>');
        assert_eq!(stored[2] + stored[3], signed.len());
        assert_eq!(stored[2] - stored[1], signer().contents_width() + 2);
    }

    #[test]
    fn test_wide_placeholder_zero_padded() {
        let wide = PdfSigner::for_key_bits(4096);
        let signed = wide.sign(MINIMAL_PDF, test_keys::private_key()).unwrap();
        let placement = SignaturePlacement::locate(&signed).unwrap();

        assert_eq!(placement.hex_field().len(), 1024);
        assert!(signed[placement.hex_field()].ends_with(&[b'0'; 512]));
        assert!(PdfSigner::verify(&signed, &public()).unwrap());
    }

    #[test]
    fn test_resign_covers_previous_signature() {
        let once = signer().sign(MINIMAL_PDF, test_keys::private_key()).unwrap();
        let twice = signer().sign(&once, test_keys::other_private_key()).unwrap();

        let other = RsaPublicKey::from(test_keys::other_private_key());
        assert!(PdfSigner::verify(&twice, &other).unwrap());
        assert!(!PdfSigner::verify(&twice, &public()).unwrap());
    }

    #[test]
    fn test_missing_eof_malformed() {
        let err = signer()
            .sign(b"%PDF-1.4\nno trailer here", test_keys::private_key())
            .unwrap_err();
        assert!(matches!(err, VaultError::MalformedDocument(_)));
    }

    #[test]
    fn test_verify_unsigned_malformed() {
        let err = PdfSigner::verify(MINIMAL_PDF, &public()).unwrap_err();
        assert!(matches!(err, VaultError::MalformedDocument(_)));
    }

    #[test]
    fn test_verify_non_hex_contents_malformed() {
        let signed = signer().sign(MINIMAL_PDF, test_keys::private_key()).unwrap();
        let placement = SignaturePlacement::locate(&signed).unwrap();
        let mut tampered = signed.clone();
        tampered[placement.hex_field().start] = b'x';

        let err = PdfSigner::verify(&tampered, &public()).unwrap_err();
        assert!(matches!(err, VaultError::MalformedDocument(_)));
    }

    #[test]
    fn test_undersized_placeholder() {
        let small = PdfSigner::for_key_bits(1024);
        let err = small.sign(MINIMAL_PDF, test_keys::private_key()).unwrap_err();
        assert!(matches!(
            err,
            VaultError::SignatureCapacity {
                needed: 512,
                capacity: 256
            }
        ));
    }

    #[test]
    fn test_contents_width() {
        assert_eq!(PdfSigner::for_key_bits(4096).contents_width(), 1024);
        assert_eq!(PdfSigner::for_key_bits(2048).contents_width(), 512);
        assert!(PdfSigner::for_key_bits(4096).check_capacity(256).is_ok());
    }

    #[test]
    fn test_render_and_parse_byte_range() {
        let rendered = render_byte_range(&[0, 1234, 5678, 90]).unwrap();
        assert_eq!(rendered, "[0000000000 0000001234 0000005678 0000000090]");
        assert_eq!(
            parse_byte_range(rendered.as_bytes()).unwrap(),
            [0, 1234, 5678, 90]
        );
        assert!(parse_byte_range(b"[1 2 3]").is_err());
        assert!(parse_byte_range(b"1 2 3 4").is_err());
    }
}
