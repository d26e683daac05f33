//! The "bulletin envelope" framing applied when `FILE_NAME_IS_HEADER` is
//! set (spec §4.4). Both functions here are pure and take no I/O, so they
//! are safe to fuzz on arbitrary filenames per the re-architecture
//! guidance in spec §9.

use crate::job::TransferMode;

const SOH: u8 = 0x01;
const ETX: u8 = 0x03;
const CR: u8 = b'\r';
const LF: u8 = b'\n';

/// Derives the bulletin header from a filename: scan until the third of
/// any of `_ - SPACE`, stopping early at `. ; NUL`. On the third such
/// separator, if the next three characters are all ASCII alphabetic, a
/// space and those three characters are appended to the header.
///
/// Behavior for exactly two trailing alphabetic characters after the third
/// separator is left unspecified by the source this was distilled from;
/// this implementation treats it as "no append", the conservative reading
/// (see DESIGN.md).
pub fn derive_header(filename: &str) -> String {
    let chars: Vec<char> = filename.chars().collect();
    let mut header = String::new();
    let mut separator_count = 0u32;
    let mut idx = 0usize;
    while idx < chars.len() {
        let c = chars[idx];
        if c == '.' || c == ';' || c == '\0' {
            break;
        }
        header.push(c);
        if c == '_' || c == '-' || c == ' ' {
            separator_count += 1;
            if separator_count == 3 {
                if idx + 4 <= chars.len() {
                    let next3 = &chars[idx + 1..idx + 4];
                    if next3.iter().all(|ch| ch.is_ascii_alphabetic()) {
                        header.push(' ');
                        header.extend(next3);
                    }
                }
                break;
            }
        }
        idx += 1;
    }
    header
}

/// The framing prefix and suffix around one file's bytes, plus the
/// declared on-wire content length (prefix + `file_size` + suffix).
pub struct Envelope {
    pub prefix: Vec<u8>,
    pub suffix: Vec<u8>,
    pub content_length: u64,
}

/// Builds the envelope for `filename`/`file_size` under `mode`, with an
/// optional WMO sequence number (spec §4.3/§4.4). The 8-digit length field
/// covers everything after the 10-byte length+type prefix, i.e.
/// `header_length + file_size + end_length` (spec §8 invariant 4).
pub fn build_envelope(filename: &str, file_size: u64, mode: TransferMode, seq: Option<u32>) -> Envelope {
    let mut body = Vec::new();
    body.push(SOH);
    body.push(CR);
    body.push(CR);
    body.push(LF);
    if let Some(seq) = seq {
        body.extend(format!("{:03}", seq % 1000).into_bytes());
        body.push(CR);
        body.push(CR);
        body.push(LF);
    }
    body.extend(derive_header(filename).into_bytes());
    body.push(CR);
    body.push(CR);
    body.push(LF);

    let suffix = vec![CR, CR, LF, ETX];
    let header_length = body.len() as u64;
    let end_length = suffix.len() as u64;
    let content_length = header_length + file_size + end_length;

    let mut prefix = format!("{:08}{}", content_length, mode.envelope_tag()).into_bytes();
    prefix.extend(body);

    Envelope { prefix, suffix, content_length }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_without_separators_is_whole_filename() {
        assert_eq!(derive_header("report.txt"), "report");
        assert_eq!(derive_header("nosuffix"), "nosuffix");
    }

    #[test]
    fn header_stops_at_semicolon_and_nul() {
        assert_eq!(derive_header("a;b"), "a");
        assert_eq!(derive_header("a\0b"), "a");
    }

    #[test]
    fn header_appends_three_alpha_chars_after_third_separator() {
        let h = derive_header("a_b_c_xyz.dat");
        assert_eq!(h, "a_b_c_ xyz");
    }

    #[test]
    fn header_does_not_append_when_fourth_char_not_alpha() {
        let h = derive_header("a_b_c_12z.dat");
        assert_eq!(h, "a_b_c_");
    }

    #[test]
    fn header_does_not_append_past_end_of_string() {
        let h = derive_header("a_b_c_xy");
        assert_eq!(h, "a_b_c_");
    }

    #[test]
    fn envelope_prefix_is_ten_bytes_then_soh_cr_cr_lf() {
        let env = build_envelope("data.bin", 1024, TransferMode::Binary, None);
        assert_eq!(&env.prefix[8..10], b"BI");
        assert_eq!(&env.prefix[10..14], &[SOH, CR, CR, LF]);
        assert_eq!(env.prefix[..8].iter().all(|b| b.is_ascii_digit()), true);
    }

    #[test]
    fn envelope_suffix_is_cr_cr_lf_etx() {
        let env = build_envelope("data.bin", 1024, TransferMode::Binary, None);
        assert_eq!(env.suffix, vec![CR, CR, LF, ETX]);
    }

    #[test]
    fn envelope_length_equals_header_plus_body_plus_end() {
        let env = build_envelope("data.bin", 1024, TransferMode::Binary, Some(7));
        let declared: u64 = String::from_utf8(env.prefix[..8].to_vec()).unwrap().parse().unwrap();
        let header_len = (env.prefix.len() - 10) as u64;
        assert_eq!(declared, header_len + 1024 + env.suffix.len() as u64);
        assert_eq!(env.content_length, declared);
    }

    #[test]
    fn sequence_number_is_three_digits_wrapped() {
        let env = build_envelope("data.bin", 0, TransferMode::Binary, Some(1234));
        let seq_bytes = &env.prefix[14..17];
        assert_eq!(seq_bytes, b"234");
    }
}
