use std::time::Instant;

/// Per-connection inbound limits.
#[derive(Debug, Clone)]
pub struct ConnectionLimits {
    /// Outbound queue length before the connection is dropped as a slow
    /// consumer.
    pub outbound_buffer: usize,
    pub max_message_bytes: usize,
    pub max_messages_per_second: u32,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            outbound_buffer: 64,
            max_message_bytes: 16 * 1024,
            max_messages_per_second: 60,
        }
    }
}

/// Per-connection token-bucket message throttle.
pub struct MessageThrottle {
    max_per_second: u32,
    tokens: u32,
    last_refill: Instant,
}

impl MessageThrottle {
    pub fn new(max_per_second: u32) -> Self {
        Self {
            max_per_second,
            tokens: max_per_second,
            last_refill: Instant::now(),
        }
    }

    /// Try to consume one message token. Returns true if allowed.
    pub fn try_consume(&mut self) -> bool {
        self.refill();
        if self.tokens > 0 {
            self.tokens -= 1;
            true
        } else {
            false
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);
        let new_tokens = (elapsed.as_secs_f64() * self.max_per_second as f64) as u32;
        if new_tokens > 0 {
            self.tokens = self.tokens.saturating_add(new_tokens).min(self.max_per_second);
            self.last_refill = now;
        }
    }
}
