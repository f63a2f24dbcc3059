//! Channel clock: a signed 53-bit counter that wraps from [`CLOCK_MAX`] to [`CLOCK_MIN`].
//!
//! The range stays within the integers a Lua number (double) represents exactly.

pub(crate) type ChannelClock = i64;

pub(crate) const CLOCK_MIN: ChannelClock = -((1 << 53) - 1);
pub(crate) const CLOCK_MAX: ChannelClock = (1 << 53) - 1;

pub(crate) fn parse_channel_clock(value: &str) -> Option<ChannelClock> {
    value.parse().ok()
}

/// Up to `count` clocks in `(from, to]`, oldest first, crossing the wrap boundary
/// when `to < from`.
pub(crate) fn iterate_clocks(count: usize, from: ChannelClock, to: ChannelClock) -> Vec<ChannelClock> {
    // Unwrapped view of `to`; i128 keeps the arithmetic clear of overflow.
    let to = if to < from {
        i128::from(to) - i128::from(CLOCK_MIN) + 1 + i128::from(CLOCK_MAX)
    } else {
        i128::from(to)
    };

    let mut result = Vec::with_capacity(count.min(1024));
    let mut clock = i128::from(from) + 1;
    while result.len() < count && clock <= to {
        let wrapped = if clock > i128::from(CLOCK_MAX) {
            clock - i128::from(CLOCK_MAX) - 1 + i128::from(CLOCK_MIN)
        } else {
            clock
        };
        // Always within CLOCK_MIN..=CLOCK_MAX.
        result.push(wrapped as ChannelClock);
        clock += 1;
    }
    result
}

/// True when `clock` lies in `(from, to]`, honoring the wrap.
pub(crate) fn is_clock_within(clock: ChannelClock, from: ChannelClock, to: ChannelClock) -> bool {
    if to < from {
        from < clock || clock <= to
    } else {
        from < clock && clock <= to
    }
}
