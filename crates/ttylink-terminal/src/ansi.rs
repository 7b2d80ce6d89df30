//! Escape sequence stripping.
//!
//! Raw PTY output is full of control sequences: colors, cursor movement,
//! bracketed-paste markers, window-title updates. None of it is meaningful in
//! a chat message, so unlike a terminal emulator we do not interpret these
//! sequences; we delete them and keep only printable text.
//!
//! Removed:
//! - CSI sequences: ESC [ params intermediates final
//! - OSC sequences: ESC ] ... terminated by BEL or ST (ESC \)
//! - DCS sequences: ESC P ... terminated by ST (ESC \)
//! - Short escapes: ESC followed by one final byte, with optional 0x20-0x2f
//!   intermediates (charset designation and friends)
//! - C0 control bytes other than LF and TAB; CR and CRLF normalize to LF

/// Stateful stripper for ANSI/VT escape sequences.
///
/// Sequences and multi-byte UTF-8 characters may be split across read chunks,
/// so the stripper carries parser state and an incomplete-character buffer
/// between calls to [`AnsiStripper::push`].
#[derive(Default)]
pub struct AnsiStripper {
    state: StripState,
    /// Pending CR: a lone CR becomes LF, CRLF collapses to a single LF.
    cr_pending: bool,
    /// Trailing bytes of an incomplete UTF-8 character.
    utf8_carry: Vec<u8>,
}

#[derive(Default, Clone, Copy, PartialEq)]
enum StripState {
    #[default]
    Normal,
    /// Saw ESC (0x1b)
    Escape,
    /// Saw ESC with intermediate bytes (0x20-0x2f), waiting for the final byte
    EscapeIntermediate,
    /// Saw ESC [
    Csi,
    /// Saw ESC ]
    Osc,
    /// Saw ESC inside OSC (potential ST terminator)
    OscEscape,
    /// Saw ESC P
    Dcs,
    /// Saw ESC inside DCS (potential ST terminator)
    DcsEscape,
}

impl AnsiStripper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process a chunk of raw PTY bytes, returning the cleaned text.
    pub fn push(&mut self, data: &[u8]) -> String {
        let mut out: Vec<u8> = Vec::with_capacity(data.len() + self.utf8_carry.len());
        out.append(&mut self.utf8_carry);

        for &byte in data {
            match self.state {
                StripState::Normal => {
                    if byte == 0x1b {
                        self.state = StripState::Escape;
                    } else {
                        self.emit(byte, &mut out);
                    }
                }

                StripState::Escape => match byte {
                    b'[' => self.state = StripState::Csi,
                    b']' => self.state = StripState::Osc,
                    b'P' => self.state = StripState::Dcs,
                    0x20..=0x2f => self.state = StripState::EscapeIntermediate,
                    // Final byte of a two-character escape (ESC c, ESC 7, ...)
                    _ => self.state = StripState::Normal,
                },

                StripState::EscapeIntermediate => {
                    // Intermediates continue, anything else is the final byte
                    if !(0x20..=0x2f).contains(&byte) {
                        self.state = StripState::Normal;
                    }
                }

                StripState::Csi => {
                    // Parameter and intermediate bytes are 0x20-0x3f; the
                    // final byte 0x40-0x7e ends the sequence.
                    if (0x40..=0x7e).contains(&byte) {
                        self.state = StripState::Normal;
                    }
                }

                StripState::Osc => match byte {
                    0x07 => self.state = StripState::Normal,
                    0x1b => self.state = StripState::OscEscape,
                    _ => {}
                },

                StripState::OscEscape => {
                    if byte == b'\\' {
                        self.state = StripState::Normal;
                    } else {
                        self.state = StripState::Osc;
                    }
                }

                StripState::Dcs => {
                    if byte == 0x1b {
                        self.state = StripState::DcsEscape;
                    }
                }

                StripState::DcsEscape => {
                    if byte == b'\\' {
                        self.state = StripState::Normal;
                    } else {
                        self.state = StripState::Dcs;
                    }
                }
            }
        }

        // Keep an incomplete trailing UTF-8 character for the next chunk.
        let valid_up_to = find_utf8_boundary(&out);
        self.utf8_carry = out.split_off(valid_up_to);
        String::from_utf8_lossy(&out).into_owned()
    }

    /// Flush remaining buffered text at end of stream.
    ///
    /// An incomplete escape sequence is discarded; an incomplete UTF-8
    /// character decodes lossily.
    pub fn flush(&mut self) -> String {
        self.state = StripState::Normal;
        let carry = std::mem::take(&mut self.utf8_carry);
        let mut text = String::from_utf8_lossy(&carry).into_owned();
        if self.cr_pending {
            self.cr_pending = false;
            text.push('\n');
        }
        text
    }

    fn emit(&mut self, byte: u8, out: &mut Vec<u8>) {
        if self.cr_pending {
            self.cr_pending = false;
            out.push(b'\n');
            if byte == b'\n' {
                return;
            }
        }
        match byte {
            b'\r' => self.cr_pending = true,
            b'\n' | b'\t' => out.push(byte),
            // Remaining C0 controls (BEL, BS, ...) and DEL carry no text
            0x00..=0x1f | 0x7f => {}
            _ => out.push(byte),
        }
    }
}

/// Find the last valid UTF-8 boundary in a byte slice.
fn find_utf8_boundary(bytes: &[u8]) -> usize {
    if std::str::from_utf8(bytes).is_ok() {
        return bytes.len();
    }

    // Look back up to 4 bytes for the start of an incomplete sequence
    for i in 1..=4.min(bytes.len()) {
        let check_pos = bytes.len() - i;
        if std::str::from_utf8(&bytes[..check_pos]).is_ok() {
            return check_pos;
        }
    }

    0
}
