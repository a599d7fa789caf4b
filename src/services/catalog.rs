//! Entity catalog
//!
//! Each importable entity type brings its columns plus the validators and
//! fixers registered for its fields. New entity types are added here, not in
//! the engines.

use std::collections::BTreeMap;

use crate::defaults::DEFAULT_PHONE_MIN_DIGITS;
use crate::services::correction::{CorrectionEngine, DateFixer, EmailFixer, FixerRegistry, PhoneFixer};
use crate::services::validation::{EmailValidator, PhoneValidator, ValidationEngine, ValidatorRegistry};
use crate::types::{ColumnRule, ColumnType, EntityDefinition};

/// Entity definition with its field registries
#[derive(Debug, Clone)]
pub struct EntityProfile {
    pub definition: EntityDefinition,
    pub validators: ValidatorRegistry,
    pub fixers: FixerRegistry,
}

impl EntityProfile {
    pub fn new(definition: EntityDefinition) -> Self {
        Self {
            definition,
            validators: ValidatorRegistry::new(),
            fixers: FixerRegistry::new(),
        }
    }

    pub fn columns(&self) -> &[ColumnRule] {
        &self.definition.columns
    }

    pub fn validation_engine(&self) -> ValidationEngine {
        ValidationEngine::new(self.validators.clone())
    }

    pub fn correction_engine(&self) -> CorrectionEngine {
        CorrectionEngine::for_columns(self.fixers.clone(), &self.definition.columns)
    }
}

#[derive(Debug, Clone, Default)]
pub struct EntityCatalog {
    entities: BTreeMap<String, EntityProfile>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, profile: EntityProfile) {
        self.entities.insert(profile.definition.key.clone(), profile);
    }

    pub fn get(&self, key: &str) -> Option<&EntityProfile> {
        self.entities.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    /// Built-in freight entities: clients, tariffs and routes
    pub fn builtin(phone_min_digits: usize) -> Self {
        let mut catalog = Self::new();

        let clientes = EntityDefinition {
            key: "clientes".into(),
            label: "Clientes".into(),
            columns: vec![
                ColumnRule::new("codigo", "Código", ColumnType::Text).required(),
                ColumnRule::new("nombre", "Nombre", ColumnType::Text).required(),
                ColumnRule::new("email", "Email", ColumnType::Text).required(),
                ColumnRule::new("telefono", "Teléfono", ColumnType::Text),
                ColumnRule::new("fecha_alta", "Fecha de alta", ColumnType::Date),
                ColumnRule::new("activo", "Activo", ColumnType::Boolean),
            ],
        };
        let mut profile = EntityProfile::new(clientes);
        profile
            .validators
            .register("email", EmailValidator)
            .register("telefono", PhoneValidator { min_digits: phone_min_digits });
        profile.fixers = contact_fixers(phone_min_digits);
        catalog.insert(profile);

        let tarifas = EntityDefinition {
            key: "tarifas".into(),
            label: "Tarifas".into(),
            columns: vec![
                ColumnRule::new("codigo", "Código", ColumnType::Text).required(),
                ColumnRule::new("origen", "Origen", ColumnType::Text).required(),
                ColumnRule::new("destino", "Destino", ColumnType::Text).required(),
                ColumnRule::new("tarifa", "Tarifa", ColumnType::Number).required(),
                ColumnRule::new("peaje", "Peaje", ColumnType::Number),
                ColumnRule::new("vigencia_desde", "Vigente desde", ColumnType::Date).required(),
                ColumnRule::new("vigencia_hasta", "Vigente hasta", ColumnType::Date),
                ColumnRule::new("activa", "Activa", ColumnType::Boolean),
            ],
        };
        let mut profile = EntityProfile::new(tarifas);
        profile.fixers = FixerRegistry::new().with_type(ColumnType::Date, DateFixer);
        catalog.insert(profile);

        let rutas = EntityDefinition {
            key: "rutas".into(),
            label: "Rutas".into(),
            columns: vec![
                ColumnRule::new("codigo", "Código", ColumnType::Text).required(),
                ColumnRule::new("origen", "Origen", ColumnType::Text).required(),
                ColumnRule::new("destino", "Destino", ColumnType::Text).required(),
                ColumnRule::new("distancia_km", "Distancia (km)", ColumnType::Number).required(),
                ColumnRule::new("tiempo_estimado_h", "Tiempo estimado (h)", ColumnType::Number),
                ColumnRule::new("contacto_email", "Email de contacto", ColumnType::Text),
            ],
        };
        let mut profile = EntityProfile::new(rutas);
        profile.validators.register("contacto_email", EmailValidator);
        profile.fixers = FixerRegistry::new().with_field("contacto_email", EmailFixer);
        catalog.insert(profile);

        catalog
    }
}

fn contact_fixers(phone_min_digits: usize) -> FixerRegistry {
    FixerRegistry::new()
        .with_field("email", EmailFixer)
        .with_field("telefono", PhoneFixer { min_digits: phone_min_digits })
        .with_type(ColumnType::Date, DateFixer)
}

/// Catalog with the default phone length
pub fn default_catalog() -> EntityCatalog {
    EntityCatalog::builtin(DEFAULT_PHONE_MIN_DIGITS)
}
