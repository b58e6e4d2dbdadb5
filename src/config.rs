use crate::calc::{CalculatedSource, InstrumentDescriptor, InstrumentKind, Period, PeriodTable};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::env;
use thiserror::Error;

/// Settings key holding a workspace's period table override.
pub const PERIOD_TABLES_SETTING: &str = "engine.periodTables";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown period '{0}'")]
    UnknownPeriod(String),
    #[error("period '{0}' is configured more than once")]
    DuplicatePeriod(String),
    #[error("period '{period}' declares instrument key '{key}' more than once")]
    DuplicateKey { period: String, key: String },
    #[error("instrument '{key}' in period '{period}' has invalid weight {weight}")]
    InvalidWeight {
        period: String,
        key: String,
        weight: f64,
    },
    #[error("calculated instrument '{key}' in period '{period}' has no calculation source")]
    UnknownCalculatedKey { period: String, key: String },
    #[error("instrument in period '{0}' has an empty key")]
    EmptyKey(String),
    #[error("invalid period tables: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let log_level = env::var("GRADEBOOKD_LOG")
            .or_else(|_| env::var("RUST_LOG"))
            .unwrap_or_else(|_| "info".to_string());
        Self {
            telemetry: TelemetryConfig { log_level },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RawInstrumentKind {
    Manual,
    Calculated,
}

/// Instrument descriptor as stored and exchanged over IPC.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawInstrumentDescriptor {
    pub name: String,
    pub key: String,
    pub kind: RawInstrumentKind,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawPeriodTable {
    pub period: String,
    pub instruments: Vec<RawInstrumentDescriptor>,
}

/// Period instrument tables the period aggregator runs against.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub periods: Vec<PeriodTable>,
}

/// Fixed table from calculated instrument key to what computes it.
/// `servicios` and `exPractico` read the table's own period. Services only
/// run in a trimester, so remediation has no `servicios`.
pub fn resolve_calculated_key(key: &str, period: Period) -> Option<CalculatedSource> {
    match key {
        "servicios" if period == Period::Remediation => None,
        "servicios" => Some(CalculatedSource::ServiceAverage(period)),
        "exPractico" => Some(CalculatedSource::PracticalExam(period)),
        "exPracticoT1" => Some(CalculatedSource::PracticalExam(Period::First)),
        "exPracticoT2" => Some(CalculatedSource::PracticalExam(Period::Second)),
        "exPracticoT3" => Some(CalculatedSource::PracticalExam(Period::Third)),
        "exPracticoRecuperacion" => Some(CalculatedSource::PracticalExam(Period::Remediation)),
        _ => None,
    }
}

fn manual(name: &str, key: &str, weight: f64) -> InstrumentDescriptor {
    InstrumentDescriptor {
        name: name.to_string(),
        key: key.to_string(),
        kind: InstrumentKind::Manual,
        weight,
    }
}

fn calculated(name: &str, key: &str, source: CalculatedSource, weight: f64) -> InstrumentDescriptor {
    InstrumentDescriptor {
        name: name.to_string(),
        key: key.to_string(),
        kind: InstrumentKind::Calculated(source),
        weight,
    }
}

fn term_table(period: Period, n: u8, practical_key: &str, last: (&str, &str)) -> PeriodTable {
    PeriodTable {
        period,
        instruments: vec![
            manual("Examen teórico", &format!("examen{}", n), 30.0),
            calculated(
                "Servicios",
                "servicios",
                CalculatedSource::ServiceAverage(period),
                40.0,
            ),
            calculated(
                "Examen práctico",
                practical_key,
                CalculatedSource::PracticalExam(period),
                20.0,
            ),
            manual(last.0, last.1, 10.0),
        ],
    }
}

impl EngineConfig {
    pub fn defaults() -> Self {
        Self {
            periods: vec![
                term_table(
                    Period::First,
                    1,
                    "exPracticoT1",
                    ("Observación sistemática", "observacion1"),
                ),
                term_table(
                    Period::Second,
                    2,
                    "exPracticoT2",
                    ("Trabajos y fichas técnicas", "trabajos2"),
                ),
                term_table(
                    Period::Third,
                    3,
                    "exPracticoT3",
                    ("Trabajos y fichas técnicas", "trabajos3"),
                ),
                PeriodTable {
                    period: Period::Remediation,
                    instruments: vec![
                        manual("Examen de recuperación", "examenRecuperacion", 50.0),
                        calculated(
                            "Examen práctico de recuperación",
                            "exPracticoRecuperacion",
                            CalculatedSource::PracticalExam(Period::Remediation),
                            50.0,
                        ),
                    ],
                },
            ],
        }
    }

    /// Resolves raw descriptors into typed ones. Periods missing from `raw`
    /// keep their default table.
    pub fn from_raw(raw: &[RawPeriodTable]) -> Result<Self, ConfigError> {
        let mut config = Self::defaults();
        let mut seen_periods: HashSet<Period> = HashSet::new();

        for table in raw {
            let period = Period::from_key(&table.period)
                .ok_or_else(|| ConfigError::UnknownPeriod(table.period.clone()))?;
            if !seen_periods.insert(period) {
                return Err(ConfigError::DuplicatePeriod(table.period.clone()));
            }

            let mut keys: HashSet<&str> = HashSet::new();
            let mut instruments = Vec::with_capacity(table.instruments.len());
            for d in &table.instruments {
                let key = d.key.trim();
                if key.is_empty() {
                    return Err(ConfigError::EmptyKey(period.as_key().to_string()));
                }
                if !keys.insert(key) {
                    return Err(ConfigError::DuplicateKey {
                        period: period.as_key().to_string(),
                        key: key.to_string(),
                    });
                }
                if !d.weight.is_finite() || d.weight < 0.0 {
                    return Err(ConfigError::InvalidWeight {
                        period: period.as_key().to_string(),
                        key: key.to_string(),
                        weight: d.weight,
                    });
                }
                let kind = match d.kind {
                    RawInstrumentKind::Manual => InstrumentKind::Manual,
                    RawInstrumentKind::Calculated => InstrumentKind::Calculated(
                        resolve_calculated_key(key, period).ok_or_else(|| {
                            ConfigError::UnknownCalculatedKey {
                                period: period.as_key().to_string(),
                                key: key.to_string(),
                            }
                        })?,
                    ),
                };
                instruments.push(InstrumentDescriptor {
                    name: d.name.clone(),
                    key: key.to_string(),
                    kind,
                    weight: d.weight,
                });
            }

            let resolved = PeriodTable {
                period,
                instruments,
            };
            match config.periods.iter_mut().find(|t| t.period == period) {
                Some(slot) => *slot = resolved,
                None => config.periods.push(resolved),
            }
        }

        Ok(config)
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        let raw: Vec<RawPeriodTable> = serde_json::from_value(value.clone())?;
        Self::from_raw(&raw)
    }

    /// Loads the workspace override, or the defaults when there is none.
    /// A stored override that no longer validates falls back to the defaults.
    pub fn load(conn: &Connection) -> anyhow::Result<Self> {
        let Some(stored) = crate::db::settings_get_json(conn, PERIOD_TABLES_SETTING)? else {
            return Ok(Self::defaults());
        };
        match Self::from_json(&stored) {
            Ok(config) => {
                tracing::info!("using workspace period table override");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(error = %e, "ignoring invalid period table override");
                Ok(Self::defaults())
            }
        }
    }

    pub fn table(&self, period: Period) -> Option<&PeriodTable> {
        self.periods.iter().find(|t| t.period == period)
    }

    pub fn to_raw(&self) -> Vec<RawPeriodTable> {
        self.periods
            .iter()
            .map(|t| RawPeriodTable {
                period: t.period.as_key().to_string(),
                instruments: t
                    .instruments
                    .iter()
                    .map(|d| RawInstrumentDescriptor {
                        name: d.name.clone(),
                        key: d.key.clone(),
                        kind: match d.kind {
                            InstrumentKind::Manual => RawInstrumentKind::Manual,
                            InstrumentKind::Calculated(_) => RawInstrumentKind::Calculated,
                        },
                        weight: d.weight,
                    })
                    .collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_round_trip_through_raw_form() {
        let defaults = EngineConfig::defaults();
        let resolved = EngineConfig::from_raw(&defaults.to_raw()).expect("defaults resolve");
        assert_eq!(resolved, defaults);
        for table in &defaults.periods {
            assert_eq!(table.declared_weight(), 100.0);
        }
    }

    #[test]
    fn calculated_keys_resolve_to_sources() {
        let t2 = EngineConfig::defaults();
        let t2 = t2.table(Period::Second).expect("t2 table");
        let practical = t2
            .instruments
            .iter()
            .find(|i| i.key == "exPracticoT2")
            .expect("practical exam instrument");
        assert_eq!(
            practical.kind,
            InstrumentKind::Calculated(CalculatedSource::PracticalExam(Period::Second))
        );
        assert_eq!(
            resolve_calculated_key("servicios", Period::Third),
            Some(CalculatedSource::ServiceAverage(Period::Third))
        );
    }

    #[test]
    fn unknown_calculated_key_fails_at_load() {
        let raw = json!([{
            "period": "t1",
            "instruments": [
                { "name": "Misterio", "key": "exTeorico", "kind": "calculated", "weight": 50 }
            ]
        }]);
        let err = EngineConfig::from_json(&raw).expect_err("must reject");
        assert!(matches!(err, ConfigError::UnknownCalculatedKey { .. }));
    }

    #[test]
    fn override_replaces_only_listed_periods() {
        let raw = json!([{
            "period": "t3",
            "instruments": [
                { "name": "Examen", "key": "examen3", "kind": "manual", "weight": 60 },
                { "name": "Servicios", "key": "servicios", "kind": "calculated", "weight": 25 }
            ]
        }]);
        let config = EngineConfig::from_json(&raw).expect("valid override");
        let t3 = config.table(Period::Third).expect("t3");
        assert_eq!(t3.instruments.len(), 2);
        assert_eq!(t3.declared_weight(), 85.0);
        assert_eq!(
            config.table(Period::First),
            EngineConfig::defaults().table(Period::First)
        );
    }

    #[test]
    fn rejects_duplicates_and_bad_weights() {
        let dup = json!([{
            "period": "t1",
            "instruments": [
                { "name": "A", "key": "examen1", "kind": "manual", "weight": 50 },
                { "name": "B", "key": "examen1", "kind": "manual", "weight": 50 }
            ]
        }]);
        assert!(matches!(
            EngineConfig::from_json(&dup),
            Err(ConfigError::DuplicateKey { .. })
        ));

        let negative = json!([{
            "period": "t1",
            "instruments": [{ "name": "A", "key": "examen1", "kind": "manual", "weight": -5 }]
        }]);
        assert!(matches!(
            EngineConfig::from_json(&negative),
            Err(ConfigError::InvalidWeight { .. })
        ));

        let remediation_services = json!([{
            "period": "recuperacion",
            "instruments": [{ "name": "Servicios", "key": "servicios", "kind": "calculated", "weight": 40 }]
        }]);
        assert!(matches!(
            EngineConfig::from_json(&remediation_services),
            Err(ConfigError::UnknownCalculatedKey { .. })
        ));

        let bad_period = json!([{ "period": "t7", "instruments": [] }]);
        assert!(matches!(
            EngineConfig::from_json(&bad_period),
            Err(ConfigError::UnknownPeriod(_))
        ));
    }
}
