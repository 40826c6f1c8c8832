//! Context that the radio sends ahead of a message.
//!
//! A `$$Msg` is usually preceded by a `$GPGGA` position report and a `$$CRC`
//! D-PRS line. We hold on to the most recent of each until the message
//! arrives. There is only ever one pending message: a newer position or D-PRS
//! line replaces the older one, there is no queue.

/// Tag prepended to the stored D-PRS line.
pub const AUXILIARY_TAG: &str = "D-PRS:";

/// Position as reported by the last `$GPGGA` packet.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Position {
    /// Degrees, negative is south
    pub latitude: Option<f64>,

    /// Degrees, negative is west
    pub longitude: Option<f64>,

    /// Meters above mean sea level
    pub altitude: Option<f64>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BlockState {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,

    /// D-PRS line, already prefixed with [`AUXILIARY_TAG`]
    pub auxiliary: Option<String>,
}

impl BlockState {
    pub fn update_position(&mut self, position: Position) {
        self.latitude = position.latitude;
        self.longitude = position.longitude;
        self.altitude = position.altitude;
    }

    pub fn update_auxiliary(&mut self, line: &str) {
        self.auxiliary = Some(format!("{AUXILIARY_TAG}{line}"));
    }

    /// Takes the pending context, leaving everything absent.
    pub fn flush(&mut self) -> BlockState {
        std::mem::take(self)
    }

    /// Discards the pending context.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn is_empty(&self) -> bool {
        self.latitude.is_none()
            && self.longitude.is_none()
            && self.altitude.is_none()
            && self.auxiliary.is_none()
    }

    /// Latitude and longitude, but only if both are known.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use crate::block::{
        BlockState,
        Position,
    };

    #[test]
    fn it_starts_empty() {
        assert!(BlockState::default().is_empty());
    }

    #[test]
    fn it_keeps_only_the_latest_update() {
        let mut block = BlockState::default();
        block.update_position(Position {
            latitude: Some(35.0),
            longitude: Some(139.0),
            altitude: Some(10.0),
        });
        block.update_position(Position {
            latitude: Some(36.0),
            longitude: None,
            altitude: Some(20.0),
        });
        block.update_auxiliary("first");
        block.update_auxiliary("second");

        assert_eq!(block.latitude, Some(36.0));
        assert_eq!(block.longitude, None);
        assert_eq!(block.altitude, Some(20.0));
        assert_eq!(block.auxiliary.as_deref(), Some("D-PRS:second"));
        assert_eq!(block.coordinates(), None);
    }

    #[test]
    fn it_flushes_a_snapshot() {
        let mut block = BlockState::default();
        block.update_position(Position {
            latitude: Some(35.5),
            longitude: Some(139.5),
            altitude: None,
        });
        block.update_auxiliary("JA1XPM");

        let snapshot = block.flush();
        assert_eq!(snapshot.coordinates(), Some((35.5, 139.5)));
        assert_eq!(snapshot.auxiliary.as_deref(), Some("D-PRS:JA1XPM"));
        assert!(block.is_empty());
    }

    #[test]
    fn it_clears_without_snapshot() {
        let mut block = BlockState::default();
        block.update_auxiliary("JA1XPM");
        block.clear();
        assert!(block.is_empty());
    }
}
