use uuid::Uuid;

use super::value_objects::OrderNumber;

/// Source of fresh order numbers.
pub trait OrderNumberGenerator: Send + Sync {
    fn generate(&self) -> OrderNumber;
}

/// Random UUIDv4 order numbers.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidOrderNumberGenerator;

impl OrderNumberGenerator for UuidOrderNumberGenerator {
    fn generate(&self) -> OrderNumber {
        OrderNumber::from_uuid(Uuid::new_v4())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generates_distinct_numbers() {
        let generator = UuidOrderNumberGenerator;
        let a = generator.generate();
        let b = generator.generate();

        assert_ne!(a, b);
        assert!(Uuid::parse_str(a.as_str()).is_ok());
    }
}
