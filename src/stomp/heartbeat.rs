use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use super::error::StompError;

/// Heart-beat intervals as carried by the `heart-beat` header.
///
/// `outgoing` is how often this side can send, `incoming` how often it wants to receive.
/// A zero duration means "none".
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeartBeat {
    pub outgoing: Duration,
    pub incoming: Duration,
}

impl HeartBeat {
    /// No heart-beating in either direction.
    pub const DISABLED: Self = Self::new(Duration::ZERO, Duration::ZERO);

    #[must_use]
    pub const fn new(outgoing: Duration, incoming: Duration) -> Self {
        Self { outgoing, incoming }
    }

    /// Resolve the effective intervals from the client's offer (`self`) and the server's
    /// `heart-beat` reply.
    ///
    /// Each direction is disabled when either side declines it; otherwise the larger of
    /// the two values applies.
    #[must_use]
    pub fn negotiate(self, server: Self) -> Self {
        Self {
            outgoing: resolve(self.outgoing, server.incoming),
            incoming: resolve(self.incoming, server.outgoing),
        }
    }
}

fn resolve(ours: Duration, theirs: Duration) -> Duration {
    if ours.is_zero() || theirs.is_zero() {
        Duration::ZERO
    } else {
        ours.max(theirs)
    }
}

impl fmt::Display for HeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{}",
            self.outgoing.as_millis(),
            self.incoming.as_millis()
        )
    }
}

impl FromStr for HeartBeat {
    type Err = StompError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StompError::InvalidHeartBeat(s.to_owned());

        let (outgoing, incoming) = s.split_once(',').ok_or_else(invalid)?;
        let outgoing = outgoing.trim().parse::<u64>().map_err(|_e| invalid())?;
        let incoming = incoming.trim().parse::<u64>().map_err(|_e| invalid())?;

        Ok(Self::new(
            Duration::from_millis(outgoing),
            Duration::from_millis(incoming),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn header_value_is_millis() {
        assert_eq!(HeartBeat::new(ms(4000), ms(4000)).to_string(), "4000,4000");
        assert_eq!(HeartBeat::DISABLED.to_string(), "0,0");
    }

    #[test]
    fn parse_header_value() {
        let parsed: HeartBeat = "10000, 0".parse().expect("valid heart-beat");

        assert_eq!(parsed, HeartBeat::new(ms(10_000), Duration::ZERO));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("4000".parse::<HeartBeat>().is_err(), "missing comma");
        assert!("a,b".parse::<HeartBeat>().is_err(), "non numeric");
        assert!("-1,0".parse::<HeartBeat>().is_err(), "negative");
    }

    #[test]
    fn negotiation_takes_larger_interval() {
        let client = HeartBeat::new(ms(4000), ms(4000));
        let server = HeartBeat::new(ms(10_000), ms(2000));

        let negotiated = client.negotiate(server);

        assert_eq!(negotiated.outgoing, ms(4000));
        assert_eq!(negotiated.incoming, ms(10_000));
    }

    #[test]
    fn negotiation_disables_declined_directions() {
        let client = HeartBeat::new(ms(4000), ms(4000));

        assert_eq!(client.negotiate(HeartBeat::DISABLED), HeartBeat::DISABLED);

        let server_sends_only = HeartBeat::new(ms(5000), Duration::ZERO);
        let negotiated = client.negotiate(server_sends_only);
        assert_eq!(negotiated.outgoing, Duration::ZERO);
        assert_eq!(negotiated.incoming, ms(5000));
    }
}
