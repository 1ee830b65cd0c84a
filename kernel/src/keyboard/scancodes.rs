//! US-English PS/2 scan-code layout: two parallel 128-byte tables mapping a
//! raw (7-bit, break-bit stripped) scan code to either an ASCII value, a
//! non-ASCII keycode constant, or the escape-prefix sentinel.

/// Non-ASCII keycodes live at and above this value so callers can tell them
/// apart from a plain ASCII byte with one comparison.
pub const SHIFT: u8 = 0x80;
pub const CTRL: u8 = 0x81;
pub const ALT: u8 = 0x82;
pub const CAPS_LOCK: u8 = 0x83;
pub const NUM_LOCK: u8 = 0x84;
pub const SCROLL_LOCK: u8 = 0x85;
pub const F1: u8 = 0x90;
pub const F2: u8 = 0x91;
pub const F3: u8 = 0x92;
pub const F4: u8 = 0x93;
pub const F5: u8 = 0x94;
pub const F6: u8 = 0x95;
pub const F7: u8 = 0x96;
pub const F8: u8 = 0x97;
pub const F9: u8 = 0x98;
pub const F10: u8 = 0x99;
pub const F11: u8 = 0x9A;
pub const F12: u8 = 0x9B;
pub const ARROW_UP: u8 = 0xA0;
pub const ARROW_DOWN: u8 = 0xA1;
pub const ARROW_LEFT: u8 = 0xA2;
pub const ARROW_RIGHT: u8 = 0xA3;
pub const HOME: u8 = 0xA4;
pub const END: u8 = 0xA5;
pub const PAGE_UP: u8 = 0xA6;
pub const PAGE_DOWN: u8 = 0xA7;
pub const INSERT: u8 = 0xA8;
pub const DELETE: u8 = 0xA9;

/// Raw scan code 0xE0 masked to 7 bits lands here; both tables carry the
/// sentinel so the translation is the same regardless of shift state.
pub const ESCAPE: u8 = 0xFE;

pub const UNSHIFTED: [u8; 128] = [
    // 0x00
    0, 0x1B, b'1', b'2', b'3', b'4', b'5', b'6',
    // 0x08
    b'7', b'8', b'9', b'0', b'-', b'=', 0x08, b'\t',
    // 0x10
    b'q', b'w', b'e', b'r', b't', b'y', b'u', b'i',
    // 0x18
    b'o', b'p', b'[', b']', b'\n', CTRL, b'a', b's',
    // 0x20
    b'd', b'f', b'g', b'h', b'j', b'k', b'l', b';',
    // 0x28
    b'\'', b'`', SHIFT, b'\\', b'z', b'x', b'c', b'v',
    // 0x30
    b'b', b'n', b'm', b',', b'.', b'/', SHIFT, b'*',
    // 0x38
    ALT, b' ', CAPS_LOCK, F1, F2, F3, F4, F5,
    // 0x40
    F6, F7, F8, F9, F10, NUM_LOCK, SCROLL_LOCK, b'7',
    // 0x48
    b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1',
    // 0x50
    b'2', b'3', b'0', b'.', 0, 0, 0, F11,
    // 0x58
    F12, 0, 0, 0, 0, 0, 0, 0,
    // 0x60
    ESCAPE, 0, 0, 0, 0, 0, 0, 0,
    // 0x68
    0, 0, 0, 0, 0, 0, 0, 0,
    // 0x70
    0, 0, 0, 0, 0, 0, 0, 0,
    // 0x78
    0, 0, 0, 0, 0, 0, 0, 0,
];

pub const SHIFTED: [u8; 128] = [
    // 0x00
    0, 0x1B, b'!', b'@', b'#', b'$', b'%', b'^',
    // 0x08
    b'&', b'*', b'(', b')', b'_', b'+', 0x08, b'\t',
    // 0x10
    b'Q', b'W', b'E', b'R', b'T', b'Y', b'U', b'I',
    // 0x18
    b'O', b'P', b'{', b'}', b'\n', CTRL, b'A', b'S',
    // 0x20
    b'D', b'F', b'G', b'H', b'J', b'K', b'L', b':',
    // 0x28
    b'"', b'~', SHIFT, b'|', b'Z', b'X', b'C', b'V',
    // 0x30
    b'B', b'N', b'M', b'<', b'>', b'?', SHIFT, b'*',
    // 0x38
    ALT, b' ', CAPS_LOCK, F1, F2, F3, F4, F5,
    // 0x40
    F6, F7, F8, F9, F10, NUM_LOCK, SCROLL_LOCK, b'7',
    // 0x48
    b'8', b'9', b'-', b'4', b'5', b'6', b'+', b'1',
    // 0x50
    b'2', b'3', b'0', b'.', 0, 0, 0, F11,
    // 0x58
    F12, 0, 0, 0, 0, 0, 0, 0,
    // 0x60
    ESCAPE, 0, 0, 0, 0, 0, 0, 0,
    // 0x68
    0, 0, 0, 0, 0, 0, 0, 0,
    // 0x70
    0, 0, 0, 0, 0, 0, 0, 0,
    // 0x78
    0, 0, 0, 0, 0, 0, 0, 0,
];

/// Overrides applied to the unshifted translation of the scan code
/// immediately following an 0xE0 escape prefix. Keys with no special
/// extended-set meaning fall back to the plain table.
pub fn escaped_override(code7: u8) -> Option<u8> {
    match code7 {
        0x48 => Some(ARROW_UP),
        0x50 => Some(ARROW_DOWN),
        0x4B => Some(ARROW_LEFT),
        0x4D => Some(ARROW_RIGHT),
        0x47 => Some(HOME),
        0x4F => Some(END),
        0x49 => Some(PAGE_UP),
        0x51 => Some(PAGE_DOWN),
        0x52 => Some(INSERT),
        0x53 => Some(DELETE),
        _ => None,
    }
}
