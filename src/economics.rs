//! Cost/benefit scoring of a facility at a cell.
//!
//! Every quantity is a [`Decimal`] so repeated per-tick comparisons never pick
//! up binary rounding drift that could flip a tie-break.

use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    error::{SimError, SimResult},
    facility::Facility,
    layers::{Layer, NamedMaps},
    world::Region,
};

/// Unwraps a checked decimal operation, naming the term that overflowed.
fn checked(value: Option<Decimal>, term: &'static str) -> SimResult<Decimal> {
    value.ok_or(SimError::Overflow(term))
}

fn default_short_term_duration() -> Decimal {
    Decimal::from(3)
}

fn default_long_term_duration() -> Decimal {
    Decimal::from(15)
}

fn default_minimum_area() -> Decimal {
    Decimal::from(800)
}

fn default_maximum_area() -> Decimal {
    Decimal::from(1000)
}

fn default_penalty() -> Decimal {
    Decimal::new(5, 1)
}

fn default_advantage() -> Decimal {
    Decimal::from(3)
}

fn default_influx_effect() -> Decimal {
    Decimal::new(114888, 5)
}

/// Fixed weights and thresholds of the scoring formula.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConstants {
    #[serde(default = "default_short_term_duration")]
    pub short_term_duration: Decimal,
    #[serde(default = "default_long_term_duration")]
    pub long_term_duration: Decimal,
    #[serde(default = "default_minimum_area")]
    pub minimum_area: Decimal,
    #[serde(default = "default_maximum_area")]
    pub maximum_area: Decimal,
    #[serde(default = "default_penalty")]
    pub penalty: Decimal,
    #[serde(default = "default_advantage")]
    pub advantage: Decimal,
    #[serde(default = "default_influx_effect")]
    pub influx_effect: Decimal,
}

impl Default for ModelConstants {
    fn default() -> Self {
        Self {
            short_term_duration: default_short_term_duration(),
            long_term_duration: default_long_term_duration(),
            minimum_area: default_minimum_area(),
            maximum_area: default_maximum_area(),
            penalty: default_penalty(),
            advantage: default_advantage(),
            influx_effect: default_influx_effect(),
        }
    }
}

impl ModelConstants {
    pub fn validate(&self) -> SimResult<()> {
        if self.minimum_area <= Decimal::ZERO {
            return Err(SimError::InvalidConstant(
                "minimum_area must be positive".into(),
            ));
        }
        if self.maximum_area < self.minimum_area {
            return Err(SimError::InvalidConstant(format!(
                "maximum_area {} is below minimum_area {}",
                self.maximum_area, self.minimum_area
            )));
        }
        if self.advantage <= Decimal::ONE {
            return Err(SimError::InvalidConstant(
                "advantage must be greater than 1".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct EconomicModel {
    constants: ModelConstants,
    has_influx: bool,
    ln_advantage_margin: Decimal,
}

impl EconomicModel {
    pub fn new(constants: ModelConstants, has_influx: bool) -> SimResult<Self> {
        constants.validate()?;
        let ln_advantage_margin = (constants.advantage - Decimal::ONE)
            .checked_ln()
            .ok_or_else(|| SimError::InvalidConstant("ln(advantage - 1) is undefined".into()))?;
        Ok(Self {
            constants,
            has_influx,
            ln_advantage_margin,
        })
    }

    pub fn constants(&self) -> &ModelConstants {
        &self.constants
    }

    pub fn has_influx(&self) -> bool {
        self.has_influx
    }

    pub fn short_term_benefits(&self, facility: &Facility) -> SimResult<Decimal> {
        let c = &facility.coefficients;
        checked(
            c.short_term_wages.checked_mul(c.short_term_workers),
            "short-term benefits",
        )
    }

    pub fn revenue(
        &self,
        layers: &NamedMaps,
        facility: &Facility,
        x: usize,
        y: usize,
    ) -> SimResult<Decimal> {
        let coverage = layers.normalized(Layer::CellCoverage, x, y)?;
        let influx = if self.has_influx {
            self.constants.influx_effect
        } else {
            Decimal::ONE
        };
        let scaled = checked(
            (Decimal::ONE + coverage).checked_mul(facility.coefficients.average_revenue),
            "revenue",
        )?;
        checked(scaled.checked_mul(influx), "revenue")
    }

    /// `solar_reduction * (2/3 * percent_solar^(5/2) - 1/3)`
    pub fn clean_energy_benefits(&self, facility: &Facility) -> SimResult<Decimal> {
        let c = &facility.coefficients;
        let root = c
            .percent_solar
            .sqrt()
            .ok_or_else(|| SimError::InvalidCoefficient {
                facility: facility.name.clone(),
                name: "percent_solar",
                reason: "square root is undefined".into(),
            })?;
        let power = checked(
            c.percent_solar
                .checked_mul(c.percent_solar)
                .and_then(|square| square.checked_mul(root)),
            "clean energy benefits",
        )?;
        let three = Decimal::from(3);
        let share = checked(
            (Decimal::TWO / three)
                .checked_mul(power)
                .and_then(|weighted| weighted.checked_sub(Decimal::ONE / three)),
            "clean energy benefits",
        )?;
        checked(c.solar_reduction.checked_mul(share), "clean energy benefits")
    }

    pub fn long_term_benefits(
        &self,
        layers: &NamedMaps,
        facility: &Facility,
        x: usize,
        y: usize,
    ) -> SimResult<Decimal> {
        let c = &facility.coefficients;
        let wages = checked(
            c.long_term_wages.checked_mul(c.long_term_workers),
            "long-term wages",
        )?;
        let clean_energy = self.clean_energy_benefits(facility)?;
        checked(
            self.revenue(layers, facility, x, y)?
                .checked_add(wages)
                .and_then(|sum| sum.checked_add(clean_energy)),
            "long-term benefits",
        )
    }

    pub fn accessibility_price(
        &self,
        layers: &NamedMaps,
        facility: &Facility,
        x: usize,
        y: usize,
    ) -> SimResult<Decimal> {
        let distance = layers.normalized(Layer::DistanceFromRoad, x, y)?;
        checked(
            facility.coefficients.accessibility_factor.checked_mul(distance),
            "accessibility price",
        )
    }

    pub fn irrigation_price(
        &self,
        layers: &NamedMaps,
        facility: &Facility,
        x: usize,
        y: usize,
    ) -> SimResult<Decimal> {
        let distance = layers.normalized(Layer::DistanceFromWater, x, y)?;
        checked(
            facility.coefficients.irrigation_factor.checked_mul(distance),
            "irrigation price",
        )
    }

    pub fn deforestation_price(
        &self,
        layers: &NamedMaps,
        facility: &Facility,
        x: usize,
        y: usize,
    ) -> SimResult<Decimal> {
        let cover = layers.normalized(Layer::TreeCover, x, y)?;
        checked(
            facility.coefficients.deforestation_factor.checked_mul(cover),
            "deforestation price",
        )
    }

    /// Scales with region area and penalizes cells whose topography strays
    /// from the region's average. A region averaging exactly zero falls back
    /// to a reference of 1.
    pub fn construction_price(
        &self,
        layers: &NamedMaps,
        facility: &Facility,
        x: usize,
        y: usize,
        region: Option<&Region>,
    ) -> SimResult<Decimal> {
        let c = &facility.coefficients;
        let (area, reference) = match region {
            Some(region) if !region.average_topography.is_zero() => {
                (Decimal::from(region.area()), region.average_topography)
            }
            Some(region) => (Decimal::from(region.area()), Decimal::ONE),
            None => (Decimal::ONE, Decimal::ONE),
        };
        let topography = layers.normalized(Layer::Topography, x, y)?;
        let relative = checked(
            c.constant
                .checked_mul(topography)
                .and_then(|scaled| scaled.checked_div(reference)),
            "construction price",
        )?;
        let deviation = checked(Decimal::ONE.checked_sub(relative), "construction price")?.abs();
        checked(
            area.checked_mul(c.construction_factor)
                .and_then(|price| price.checked_mul(Decimal::ONE.checked_sub(deviation)?)),
            "construction price",
        )
    }

    pub fn labor_price(&self, facility: &Facility) -> SimResult<Decimal> {
        let c = &facility.coefficients;
        checked(
            c.short_term_wages.checked_mul(c.short_term_workers),
            "labor price",
        )
    }

    pub fn short_term_costs(
        &self,
        layers: &NamedMaps,
        facility: &Facility,
        x: usize,
        y: usize,
        region: Option<&Region>,
    ) -> SimResult<Decimal> {
        let terms = [
            self.accessibility_price(layers, facility, x, y)?,
            self.irrigation_price(layers, facility, x, y)?,
            self.deforestation_price(layers, facility, x, y)?,
            self.construction_price(layers, facility, x, y, region)?,
            self.labor_price(facility)?,
        ];
        terms.into_iter().try_fold(Decimal::ZERO, |total, term| {
            checked(total.checked_add(term), "short-term costs")
        })
    }

    pub fn carbon_taxation(
        &self,
        facility: &Facility,
        region: Option<&Region>,
    ) -> SimResult<Decimal> {
        let c = &facility.coefficients;
        let area = region.map_or(Decimal::ONE, |region| Decimal::from(region.area()));
        let excess = checked(
            c.carbon_produced.checked_sub(c.upper_carbon_limit),
            "carbon taxation",
        )?
        .max(Decimal::ZERO);
        checked(
            area.checked_mul(c.taxation_factor)
                .and_then(|rate| rate.checked_mul(excess)),
            "carbon taxation",
        )
    }

    pub fn long_term_costs(
        &self,
        facility: &Facility,
        region: Option<&Region>,
    ) -> SimResult<Decimal> {
        let c = &facility.coefficients;
        let tax = self.carbon_taxation(facility, region)?;
        checked(
            c.operating_costs
                .checked_add(c.utility_costs)
                .and_then(|sum| sum.checked_add(tax)),
            "long-term costs",
        )
    }

    /// Area elasticity ("law of diminishing marginal returns") multiplier.
    ///
    /// `None` means single-cell scoring and is always neutral. Below
    /// `minimum_area` an exponential ramp applies, above `maximum_area` the
    /// value decays toward `penalty`; the band in between (bounds included) is
    /// exactly 1.
    pub fn ldmr_multiplier(&self, area: Option<usize>) -> SimResult<Decimal> {
        let Some(area) = area else {
            return Ok(Decimal::ONE);
        };
        let area = Decimal::from(area);
        let constants = &self.constants;
        if area < constants.minimum_area {
            let slope = Decimal::from(7) / constants.minimum_area;
            let exponent = -slope * area + self.ln_advantage_margin + slope;
            return exponent
                .checked_exp()
                .ok_or(SimError::Overflow("area multiplier"));
        }
        if area > constants.maximum_area {
            return Ok(constants.penalty
                + Decimal::ONE / (area - constants.maximum_area + Decimal::from(5)));
        }
        Ok(Decimal::ONE)
    }

    /// Weighted benefit-to-cost ratio of `facility` at `(x, y)`, scaled by the
    /// area multiplier of `region`. A zero combined cost scores 0.
    pub fn score(
        &self,
        layers: &NamedMaps,
        facility: &Facility,
        x: usize,
        y: usize,
        region: Option<&Region>,
    ) -> SimResult<Decimal> {
        let short = self.constants.short_term_duration;
        let long = self.constants.long_term_duration;
        let short_benefits = self.short_term_benefits(facility)?;
        let long_benefits = self.long_term_benefits(layers, facility, x, y)?;
        let benefits = checked(
            short_benefits
                .checked_mul(short)
                .zip(long_benefits.checked_mul(long))
                .and_then(|(short, long)| short.checked_add(long)),
            "benefits",
        )?;
        let short_costs = self.short_term_costs(layers, facility, x, y, region)?;
        let long_costs = self.long_term_costs(facility, region)?;
        let costs = checked(
            short_costs
                .checked_mul(short)
                .zip(long_costs.checked_mul(long))
                .and_then(|(short, long)| short.checked_add(long)),
            "costs",
        )?;
        if costs.is_zero() {
            trace!(facility = %facility.name, x, y, "zero combined cost, scoring 0");
            return Ok(Decimal::ZERO);
        }
        let ratio = checked(benefits.checked_div(costs), "score")?;
        let multiplier = self.ldmr_multiplier(region.map(Region::area))?;
        checked(ratio.checked_mul(multiplier), "score")
    }
}
