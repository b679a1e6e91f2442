use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{SimError, SimResult};

/// Stable identity of a facility: its index in the scenario's facility list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FacilityId(u16);

impl FacilityId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub fn hex(self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.0, self.1, self.2)
    }
}

/// Economic coefficients attached to a facility by name.
#[derive(Debug, Clone, PartialEq)]
pub struct Coefficients {
    pub short_term_wages: Decimal,
    pub short_term_workers: Decimal,
    pub average_revenue: Decimal,
    pub long_term_wages: Decimal,
    pub long_term_workers: Decimal,
    pub solar_reduction: Decimal,
    pub percent_solar: Decimal,
    pub accessibility_factor: Decimal,
    pub irrigation_factor: Decimal,
    pub deforestation_factor: Decimal,
    pub construction_factor: Decimal,
    pub constant: Decimal,
    pub taxation_factor: Decimal,
    pub carbon_produced: Decimal,
    pub upper_carbon_limit: Decimal,
    pub operating_costs: Decimal,
    pub utility_costs: Decimal,
}

impl Coefficients {
    pub const NAMES: [&'static str; 17] = [
        "short_term_wages",
        "short_term_workers",
        "average_revenue",
        "long_term_wages",
        "long_term_workers",
        "solar_reduction",
        "percent_solar",
        "accessibility_factor",
        "irrigation_factor",
        "deforestation_factor",
        "construction_factor",
        "constant",
        "taxation_factor",
        "carbon_produced",
        "upper_carbon_limit",
        "operating_costs",
        "utility_costs",
    ];

    /// Resolves every named coefficient for `facility`. Unknown extra names are
    /// ignored.
    pub fn from_map(facility: &str, values: &BTreeMap<String, Decimal>) -> SimResult<Self> {
        let get = |name: &'static str| {
            values
                .get(name)
                .copied()
                .ok_or_else(|| SimError::MissingCoefficient {
                    facility: facility.to_string(),
                    name,
                })
        };
        let coefficients = Self {
            short_term_wages: get("short_term_wages")?,
            short_term_workers: get("short_term_workers")?,
            average_revenue: get("average_revenue")?,
            long_term_wages: get("long_term_wages")?,
            long_term_workers: get("long_term_workers")?,
            solar_reduction: get("solar_reduction")?,
            percent_solar: get("percent_solar")?,
            accessibility_factor: get("accessibility_factor")?,
            irrigation_factor: get("irrigation_factor")?,
            deforestation_factor: get("deforestation_factor")?,
            construction_factor: get("construction_factor")?,
            constant: get("constant")?,
            taxation_factor: get("taxation_factor")?,
            carbon_produced: get("carbon_produced")?,
            upper_carbon_limit: get("upper_carbon_limit")?,
            operating_costs: get("operating_costs")?,
            utility_costs: get("utility_costs")?,
        };
        if coefficients.percent_solar < Decimal::ZERO {
            return Err(SimError::InvalidCoefficient {
                facility: facility.to_string(),
                name: "percent_solar",
                reason: "must not be negative".into(),
            });
        }
        Ok(coefficients)
    }

    /// All coefficients zero; handy as a base for hand-built facilities.
    pub fn zeroed() -> Self {
        let zero = Decimal::ZERO;
        Self {
            short_term_wages: zero,
            short_term_workers: zero,
            average_revenue: zero,
            long_term_wages: zero,
            long_term_workers: zero,
            solar_reduction: zero,
            percent_solar: zero,
            accessibility_factor: zero,
            irrigation_factor: zero,
            deforestation_factor: zero,
            construction_factor: zero,
            constant: zero,
            taxation_factor: zero,
            carbon_produced: zero,
            upper_carbon_limit: zero,
            operating_costs: zero,
            utility_costs: zero,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Facility {
    pub id: FacilityId,
    pub name: String,
    pub color: Rgb,
    pub coefficients: Coefficients,
}

/// The fixed roster of facilities for a simulation.
#[derive(Debug, Clone, Default)]
pub struct FacilitySet {
    facilities: Vec<Facility>,
}

impl FacilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(
        &mut self,
        name: impl Into<String>,
        color: Rgb,
        coefficients: Coefficients,
    ) -> FacilityId {
        let id = FacilityId(self.facilities.len() as u16);
        self.facilities.push(Facility {
            id,
            name: name.into(),
            color,
            coefficients,
        });
        id
    }

    pub fn get(&self, id: FacilityId) -> &Facility {
        &self.facilities[id.index()]
    }

    pub fn find(&self, name: &str) -> Option<FacilityId> {
        self.facilities
            .iter()
            .find(|facility| facility.name == name)
            .map(|facility| facility.id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Facility> {
        self.facilities.iter()
    }

    pub fn len(&self) -> usize {
        self.facilities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facilities.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_map() -> BTreeMap<String, Decimal> {
        Coefficients::NAMES
            .iter()
            .map(|name| (name.to_string(), Decimal::ONE))
            .collect()
    }

    #[test]
    fn resolves_all_named_coefficients() {
        let coefficients = Coefficients::from_map("Crop Farm", &full_map()).unwrap();
        assert_eq!(coefficients.upper_carbon_limit, Decimal::ONE);
    }

    #[test]
    fn missing_coefficient_names_the_facility() {
        let mut values = full_map();
        values.remove("utility_costs");
        let err = Coefficients::from_map("Solar Array", &values).unwrap_err();
        assert!(matches!(
            err,
            SimError::MissingCoefficient { ref facility, name: "utility_costs" } if facility == "Solar Array"
        ));
    }

    #[test]
    fn negative_percent_solar_is_rejected() {
        let mut values = full_map();
        values.insert("percent_solar".into(), Decimal::NEGATIVE_ONE);
        assert!(matches!(
            Coefficients::from_map("Solar Array", &values),
            Err(SimError::InvalidCoefficient { .. })
        ));
    }

    #[test]
    fn identical_coefficients_keep_distinct_identities() {
        let mut set = FacilitySet::new();
        let a = set.add("A", Rgb(1, 2, 3), Coefficients::zeroed());
        let b = set.add("B", Rgb(1, 2, 3), Coefficients::zeroed());
        assert_ne!(a, b);
        assert_eq!(set.find("B"), Some(b));
        assert_eq!(Rgb(216, 0, 57).hex(), "#d80039");
    }
}
