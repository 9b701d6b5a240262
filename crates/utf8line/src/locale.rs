//! Locale codeset detection and conversion to UTF-8
//!
//! UTF-8 locales take the fast path: strict validation plus a copy.
//! Everything else goes through iconv. An incomplete multi-byte tail is
//! not an error - the conversion succeeds with fewer bytes read, and the
//! caller retries once more input arrives.

use std::ffi::CStr;

use crate::{validate, EncodingError};

/// A successful conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversion {
    /// The converted text
    pub text: String,

    /// Input bytes consumed; less than the input length when the input
    /// ended in an incomplete multi-byte sequence
    pub bytes_read: usize,
}

/// Name of the current locale's codeset
pub fn charset() -> String {
    let cs = unsafe { libc::nl_langinfo(libc::CODESET) };
    if cs.is_null() {
        return String::from("ANSI_X3.4-1968");
    }
    unsafe { CStr::from_ptr(cs) }.to_string_lossy().into_owned()
}

/// True when the current locale already encodes text as UTF-8
pub fn is_locale_utf8() -> bool {
    charset() == "UTF-8"
}

/// Convert bytes from the current locale's codeset to UTF-8
pub fn locale_to_utf8(input: &[u8]) -> Result<Conversion, EncodingError> {
    to_utf8_with_charset(input, &charset())
}

/// Convert bytes from a named codeset to UTF-8
pub fn to_utf8_with_charset(input: &[u8], charset: &str) -> Result<Conversion, EncodingError> {
    if charset == "UTF-8" {
        let (ok, _) = validate(input);
        if !ok {
            return Err(EncodingError::InvalidSequence);
        }
        let text =
            String::from_utf8(input.to_vec()).map_err(|_| EncodingError::InvalidSequence)?;
        return Ok(Conversion {
            text,
            bytes_read: input.len(),
        });
    }

    convert_with_iconv(input, charset)
}

cfg_if::cfg_if! {
    if #[cfg(all(unix, not(target_env = "musl")))] {
        use std::ffi::CString;

        /// iconv conversion with a doubling output buffer
        fn convert_with_iconv(input: &[u8], from: &str) -> Result<Conversion, EncodingError> {
            let to_code = CString::new("UTF-8").map_err(|_| EncodingError::Unsupported)?;
            let from_code = CString::new(from).map_err(|_| EncodingError::Unsupported)?;

            let cd = unsafe { libc::iconv_open(to_code.as_ptr(), from_code.as_ptr()) };
            if cd as isize == -1 {
                return Err(EncodingError::Unsupported);
            }

            let result = run_iconv(cd, input);
            unsafe { libc::iconv_close(cd) };
            result
        }

        fn run_iconv(cd: libc::iconv_t, input: &[u8]) -> Result<Conversion, EncodingError> {
            let mut inbuf = input.as_ptr() as *mut libc::c_char;
            let mut in_left = input.len();

            let mut out = vec![0u8; input.len() + 4];
            let mut out_pos = 0usize;
            let mut flushing = false;

            loop {
                let mut outp = out[out_pos..].as_mut_ptr() as *mut libc::c_char;
                let mut out_left = out.len() - out_pos;

                let r = unsafe {
                    if flushing {
                        // NULL input flushes any pending shift state
                        libc::iconv(
                            cd,
                            std::ptr::null_mut(),
                            &mut in_left,
                            &mut outp,
                            &mut out_left,
                        )
                    } else {
                        libc::iconv(cd, &mut inbuf, &mut in_left, &mut outp, &mut out_left)
                    }
                };
                out_pos = out.len() - out_left;

                if r == usize::MAX {
                    let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
                    match errno {
                        // Incomplete trailing sequence: success, fewer bytes read
                        libc::EINVAL => break,
                        libc::E2BIG => {
                            let grown = out.len() * 2;
                            out.resize(grown, 0);
                        }
                        _ => return Err(EncodingError::InvalidSequence),
                    }
                } else if !flushing {
                    flushing = true;
                    in_left = 0;
                } else {
                    break;
                }
            }

            let bytes_read = inbuf as usize - input.as_ptr() as usize;
            out.truncate(out_pos);
            let text = String::from_utf8(out).map_err(|_| EncodingError::InvalidSequence)?;

            Ok(Conversion { text, bytes_read })
        }
    } else {
        /// No iconv bindings on this target; only UTF-8 locales convert
        fn convert_with_iconv(_input: &[u8], _from: &str) -> Result<Conversion, EncodingError> {
            Err(EncodingError::Unsupported)
        }
    }
}
