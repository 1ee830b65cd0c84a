//! Keyboard subsystem: scan-code decode, modifier/lock tracking, and the
//! fixed-capacity ring buffer shared between the IRQ-1 handler (producer)
//! and mainline pollers (consumer).

mod event;
mod modifiers;
mod scancodes;

pub use event::{Break, KeyEvent};
pub use modifiers::Modifiers;

use crate::arch::io::in8;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

const DATA_PORT: u16 = 0x60;
const RING_CAPACITY: usize = 32;
const KEYBOARD_IRQ: u8 = 1;
const KEYBOARD_VECTOR: u8 = 0x21;

struct Ring {
    buf: [Option<KeyEvent>; RING_CAPACITY],
    head: usize,
    tail: usize,
}

impl Ring {
    const fn new() -> Self {
        Ring {
            buf: [None; RING_CAPACITY],
            head: 0,
            tail: 0,
        }
    }

    /// Drops the event silently if the buffer is already full. Returns
    /// whether the event was actually stored, so the caller's occupancy
    /// counter stays in sync with what the ring really holds.
    fn push(&mut self, event: KeyEvent) -> bool {
        let next_tail = (self.tail + 1) % RING_CAPACITY;
        if next_tail == self.head {
            return false;
        }
        self.buf[self.tail] = Some(event);
        self.tail = next_tail;
        true
    }

    fn pop(&mut self) -> Option<KeyEvent> {
        if self.head == self.tail {
            return None;
        }
        let event = self.buf[self.head].take();
        self.head = (self.head + 1) % RING_CAPACITY;
        event
    }
}

/// Only the producer (IRQ-1 handler) touches `tail`; only the consumer
/// touches `head`. `SIZE` is the one field both sides actually synchronize
/// on, with acquire/release ordering standing in for the mask that would
/// otherwise be needed around the shared buffer.
static RING: Mutex<Ring> = Mutex::new(Ring::new());
static SIZE: AtomicUsize = AtomicUsize::new(0);
static MODIFIERS: Mutex<Modifiers> = Mutex::new(Modifiers::empty());

pub fn init() {
    crate::interrupts::install_handler(KEYBOARD_VECTOR, Some(on_irq1));
    crate::interrupts::irq_unmask(KEYBOARD_IRQ);
    log::info!("keyboard IRQ-1 handler installed and unmasked");
}

fn on_irq1(_ctx: &crate::interrupts::InterruptContext) {
    let raw = in8(DATA_PORT);
    let mut mods = MODIFIERS.lock();
    if let Some(event) = decode(raw, &mut mods) {
        if RING.lock().push(event) {
            SIZE.fetch_add(1, Ordering::Release);
        }
    }
    drop(mods);
    crate::interrupts::notify_end_of_interrupt(KEYBOARD_VECTOR);
}

/// Translates one raw scan-code byte against the current modifier state,
/// mutating it in place. Returns `None` for an escape-prefix byte (no event
/// is emitted) or `Some(event)` otherwise. Host-testable in isolation from
/// the hardware port and the ring buffer.
fn decode(raw: u8, mods: &mut Modifiers) -> Option<KeyEvent> {
    let break_state = if raw & 0x80 != 0 { Break::Up } else { Break::Down };
    let code7 = raw & 0x7F;

    let unshifted = scancodes::UNSHIFTED[code7 as usize];
    if unshifted == scancodes::ESCAPE {
        mods.set(modifiers::ESCAPED, true);
        return None;
    }

    let keycode = if mods.contains(modifiers::ESCAPED) {
        scancodes::escaped_override(code7).unwrap_or(unshifted)
    } else {
        unshifted
    };

    update_press_release(mods, keycode, break_state);

    let caps_inverts = mods.contains(modifiers::CAPS_LOCK) && is_lower_ascii(unshifted);
    let effective_shift = mods.contains(modifiers::SHIFT) ^ caps_inverts;
    let selected = if effective_shift {
        scancodes::SHIFTED[code7 as usize]
    } else {
        scancodes::UNSHIFTED[code7 as usize]
    };

    let ascii = if break_state == Break::Down && keycode < 0x80 {
        if mods.contains(modifiers::CTRL) && is_lower_ascii(unshifted) {
            unshifted - b'a' + 1
        } else {
            selected
        }
    } else {
        0
    };

    mods.set(modifiers::ESCAPED, false);

    Some(KeyEvent {
        break_state,
        modifiers: *mods,
        keycode,
        ascii,
    })
}

fn update_press_release(mods: &mut Modifiers, keycode: u8, break_state: Break) {
    let down = break_state == Break::Down;
    match keycode {
        scancodes::SHIFT => mods.set(modifiers::SHIFT, down),
        scancodes::CTRL => mods.set(modifiers::CTRL, down),
        scancodes::ALT => mods.set(modifiers::ALT, down),
        scancodes::CAPS_LOCK if !down => mods.toggle(modifiers::CAPS_LOCK),
        scancodes::NUM_LOCK if !down => mods.toggle(modifiers::NUM_LOCK),
        scancodes::SCROLL_LOCK if !down => mods.toggle(modifiers::SCROLL_LOCK),
        _ => {}
    }
}

fn is_lower_ascii(byte: u8) -> bool {
    (b'a'..=b'z').contains(&byte)
}

/// Pops at most one event and returns its ASCII character, skipping events
/// whose ASCII field is 0. Safe to call outside interrupt context.
pub fn try_next_char() -> Option<char> {
    loop {
        let event = try_next_key()?;
        if let Some(c) = event.ascii_char() {
            return Some(c);
        }
    }
}

/// Pops at most one event from the ring buffer.
pub fn try_next_key() -> Option<KeyEvent> {
    if SIZE.load(Ordering::Acquire) == 0 {
        return None;
    }
    let event = RING.lock().pop();
    if event.is_some() {
        SIZE.fetch_sub(1, Ordering::Release);
    }
    event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_a_decode_matches_expected_event_stream() {
        let mut mods = Modifiers::empty();

        let shift_down = decode(0x2A, &mut mods).unwrap();
        assert_eq!(shift_down.break_state, Break::Down);
        assert_eq!(shift_down.keycode, scancodes::SHIFT);
        assert_eq!(shift_down.ascii, 0);
        assert!(shift_down.modifiers.contains(modifiers::SHIFT));

        let a_down = decode(0x1E, &mut mods).unwrap();
        assert_eq!(a_down.break_state, Break::Down);
        assert_eq!(a_down.keycode, b'a');
        assert_eq!(a_down.ascii, b'A');
        assert!(a_down.modifiers.contains(modifiers::SHIFT));

        let a_up = decode(0x9E, &mut mods).unwrap();
        assert_eq!(a_up.break_state, Break::Up);
        assert_eq!(a_up.keycode, b'a');
        assert_eq!(a_up.ascii, 0);
        assert!(a_up.modifiers.contains(modifiers::SHIFT));

        let shift_up = decode(0xAA, &mut mods).unwrap();
        assert_eq!(shift_up.break_state, Break::Up);
        assert_eq!(shift_up.keycode, scancodes::SHIFT);
        assert!(!shift_up.modifiers.contains(modifiers::SHIFT));
    }

    #[test]
    fn escaped_arrow_up_emits_single_down_event_with_escaped_bit_cleared() {
        let mut mods = Modifiers::empty();

        assert!(decode(0xE0, &mut mods).is_none());
        assert!(mods.contains(modifiers::ESCAPED));

        let event = decode(0x48, &mut mods).unwrap();
        assert_eq!(event.break_state, Break::Down);
        assert_eq!(event.keycode, scancodes::ARROW_UP);
        assert_eq!(event.ascii, 0);
        assert!(!event.modifiers.contains(modifiers::ESCAPED));
        assert!(!mods.contains(modifiers::ESCAPED));
    }

    #[test]
    fn ctrl_c_produces_control_code() {
        let mut mods = Modifiers::empty();
        decode(0x1D, &mut mods); // left ctrl down
        let event = decode(0x2E, &mut mods).unwrap(); // 'c' down
        assert_eq!(event.ascii, 0x03);
    }

    #[test]
    fn ring_buffer_drops_events_past_capacity() {
        let mut ring = Ring::new();
        let event = KeyEvent {
            break_state: Break::Down,
            modifiers: Modifiers::empty(),
            keycode: b'a',
            ascii: b'a',
        };
        let mut stored = 0;
        for _ in 0..RING_CAPACITY {
            if ring.push(event) {
                stored += 1;
            }
        }
        // One slot is always kept empty to distinguish full from empty.
        assert_eq!(stored, RING_CAPACITY - 1);
        assert!(!ring.push(event));
        for _ in 0..(RING_CAPACITY - 1) {
            assert!(ring.pop().is_some());
        }
        assert!(ring.pop().is_none());
    }
}
