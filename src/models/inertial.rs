use thiserror::Error;

/// One inertial data message pushed by a device while streaming is enabled.
/// ASCII form on the wire: `I,<timestamp>,<gx>,<gy>,<gz>,<ax>,<ay>,<az>`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InertialMessage {
    pub timestamp: u64,
    pub gyroscope: [f32; 3],
    pub accelerometer: [f32; 3],
}

#[derive(Error, Debug)]
pub enum InertialParseError {
    #[error("Not an inertial message.")]
    WrongIdentifier,

    #[error("Expected 8 fields, found {0}.")]
    WrongFieldCount(usize),

    #[error("Invalid number in field {0}.")]
    InvalidNumber(usize),
}

impl InertialMessage {
    pub fn parse(line: &str) -> Result<Self, InertialParseError> {
        let fields: Vec<&str> = line.trim_end().split(',').collect();

        if fields.first() != Some(&"I") {
            return Err(InertialParseError::WrongIdentifier);
        }
        if fields.len() != 8 {
            return Err(InertialParseError::WrongFieldCount(fields.len()));
        }

        let timestamp = fields[1]
            .parse::<u64>()
            .map_err(|_| InertialParseError::InvalidNumber(1))?;

        let mut values = [0f32; 6];
        for (index, value) in values.iter_mut().enumerate() {
            *value = fields[index + 2]
                .parse::<f32>()
                .map_err(|_| InertialParseError::InvalidNumber(index + 2))?;
        }

        Ok(Self {
            timestamp,
            gyroscope: [values[0], values[1], values[2]],
            accelerometer: [values[3], values[4], values[5]],
        })
    }
}

/// Running vector sum of gyroscope samples, converted to an elementwise mean
/// on demand. An empty accumulator has no mean.
#[derive(Debug, Default, Clone, Copy)]
pub struct GyroscopeAccumulator {
    sum: [f64; 3],
    count: u32,
}

impl GyroscopeAccumulator {
    pub fn add(&mut self, sample: [f32; 3]) {
        for (sum, sample) in self.sum.iter_mut().zip(sample) {
            *sum += f64::from(sample);
        }
        self.count += 1;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn mean(&self) -> Option<[f64; 3]> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum.map(|sum| sum / f64::from(self.count)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inertial_message() {
        let message = InertialMessage::parse("I,123456,1.5,-2.25,0.0,0.01,-0.02,9.81").unwrap();
        assert_eq!(message.timestamp, 123456);
        assert_eq!(message.gyroscope, [1.5, -2.25, 0.0]);
        assert_eq!(message.accelerometer, [0.01, -0.02, 9.81]);
    }

    #[test]
    fn test_parse_tolerates_trailing_carriage_return() {
        assert!(InertialMessage::parse("I,0,0,0,0,0,0,0\r").is_ok());
    }

    #[test]
    fn test_parse_rejects_other_messages() {
        assert!(matches!(
            InertialMessage::parse("Q,0,1,0,0,0"),
            Err(InertialParseError::WrongIdentifier)
        ));
        assert!(matches!(
            InertialMessage::parse("I,0,1.0"),
            Err(InertialParseError::WrongFieldCount(3))
        ));
        assert!(matches!(
            InertialMessage::parse("I,0,x,0,0,0,0,0"),
            Err(InertialParseError::InvalidNumber(2))
        ));
    }

    #[test]
    fn test_accumulator_mean_is_sum_over_count() {
        let mut accumulator = GyroscopeAccumulator::default();
        accumulator.add([1.0, 2.0, 3.0]);
        accumulator.add([3.0, 4.0, 5.0]);
        assert_eq!(accumulator.count(), 2);
        assert_eq!(accumulator.mean(), Some([2.0, 3.0, 4.0]));
    }

    #[test]
    fn test_empty_accumulator_has_no_mean() {
        assert_eq!(GyroscopeAccumulator::default().mean(), None);
    }
}
