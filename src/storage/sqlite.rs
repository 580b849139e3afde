//! SQLite store and the per-table batch writers

use super::bulk::{
    OnConflict, Upsert, delete_where_in, existing_keys, int, opt_int, opt_text, text,
};
use super::schema::{LOAD_ORDER, Table, initialise_schema};
use crate::error::PersistenceError;
use crate::etl::LoadReport;
use crate::model::RecordBatch;
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, Transaction};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Row count per table.
pub type TableCounts = BTreeMap<&'static str, u64>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const TYPES: Upsert = Upsert {
    table: "types",
    columns: &["name", "source_id"],
    key: &["name"],
    on_conflict: OnConflict::Update {
        keep_when_null: &["source_id"],
    },
};

const TYPE_STUBS: Upsert = Upsert {
    table: "types",
    columns: &["name"],
    key: &["name"],
    on_conflict: OnConflict::Ignore,
};

const ABILITIES: Upsert = Upsert {
    table: "abilities",
    columns: &["name", "effect", "short_effect"],
    key: &["name"],
    on_conflict: OnConflict::Update { keep_when_null: &[] },
};

const ABILITY_STUBS: Upsert = Upsert {
    table: "abilities",
    columns: &["name"],
    key: &["name"],
    on_conflict: OnConflict::Ignore,
};

const EVOLUTION_CHAINS: Upsert = Upsert {
    table: "evolution_chains",
    columns: &["chain_id", "root_species"],
    key: &["chain_id"],
    on_conflict: OnConflict::Update { keep_when_null: &[] },
};

const SPECIES: Upsert = Upsert {
    table: "species",
    columns: &[
        "name",
        "genus",
        "flavor_text",
        "generation",
        "gender_rate",
        "capture_rate",
        "base_happiness",
        "egg_groups",
        "is_legendary",
        "is_mythical",
        "evolution_chain_id",
    ],
    key: &["name"],
    on_conflict: OnConflict::Update {
        keep_when_null: &["evolution_chain_id"],
    },
};

const MOVES: Upsert = Upsert {
    table: "moves",
    columns: &[
        "name",
        "power",
        "accuracy",
        "pp",
        "damage_class",
        "type_name",
        "description",
    ],
    key: &["name"],
    on_conflict: OnConflict::Update { keep_when_null: &[] },
};

const CREATURES: Upsert = Upsert {
    table: "creatures",
    columns: &[
        "id",
        "name",
        "height",
        "weight",
        "base_experience",
        "hp",
        "attack",
        "defense",
        "special_attack",
        "special_defense",
        "speed",
        "species_name",
        "sprite_front_default",
        "sprite_front_shiny",
    ],
    key: &["id"],
    on_conflict: OnConflict::Update {
        keep_when_null: &["species_name"],
    },
};

const TYPE_EFFICACY: Upsert = Upsert {
    table: "type_efficacy",
    columns: &["attacker", "defender", "damage_factor"],
    key: &["attacker", "defender"],
    on_conflict: OnConflict::Update { keep_when_null: &[] },
};

const EVOLUTION_LINKS: Upsert = Upsert {
    table: "evolution_links",
    columns: &["chain_id", "from_species", "to_species", "min_level", "trigger_name"],
    key: &["chain_id", "from_species", "to_species"],
    on_conflict: OnConflict::Update { keep_when_null: &[] },
};

const CREATURE_TYPES: Upsert = Upsert {
    table: "creature_types",
    columns: &["creature_id", "type_name", "slot"],
    key: &["creature_id", "type_name"],
    on_conflict: OnConflict::Update { keep_when_null: &[] },
};

const CREATURE_ABILITIES: Upsert = Upsert {
    table: "creature_abilities",
    columns: &["creature_id", "ability_name", "slot", "is_hidden"],
    key: &["creature_id", "ability_name"],
    on_conflict: OnConflict::Update { keep_when_null: &[] },
};

const CREATURE_MOVES: Upsert = Upsert {
    table: "creature_moves",
    columns: &["creature_id", "move_name", "learn_method", "level"],
    key: &["creature_id", "move_name", "learn_method"],
    on_conflict: OnConflict::Update { keep_when_null: &[] },
};

/// SQLite-backed relational store.
///
/// One connection serialized behind a mutex; calls block, so async callers
/// go through [`super::StoreLoader`].
///
/// # Example
/// ```
/// use pokedex_sync::model::RecordBatch;
/// use pokedex_sync::storage::Store;
/// use tokio_util::sync::CancellationToken;
///
/// let store = Store::open_in_memory().unwrap();
/// let report = store
///     .persist(&RecordBatch::default(), &CancellationToken::new())
///     .unwrap();
/// assert_eq!(report.rows_written(), 0);
/// assert_eq!(store.counts().unwrap()["creatures"], 0);
/// ```
#[derive(Debug)]
pub struct Store {
    connection: Mutex<Connection>,
    location: String,
}

impl Store {
    /// Open (or create) the database file at `path` and make sure the schema
    /// exists.
    ///
    /// # Errors
    /// Returns [`PersistenceError::Unavailable`] when the file cannot be
    /// opened, or [`PersistenceError::SchemaMismatch`] for a database written
    /// by an incompatible version.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        let connection = Connection::open(path)
            .map_err(|e| PersistenceError::from_sqlite("open database", e))?;
        Self::from_connection(connection, path.display().to_string())
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let connection = Connection::open_in_memory()
            .map_err(|e| PersistenceError::from_sqlite("open database", e))?;
        Self::from_connection(connection, ":memory:".to_string())
    }

    fn from_connection(mut connection: Connection, location: String) -> Result<Self, PersistenceError> {
        connection
            .busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| PersistenceError::from_sqlite("set busy timeout", e))?;
        initialise_schema(&mut connection)?;
        log::debug!("Opened store at {}", location);
        Ok(Self {
            connection: Mutex::new(connection),
            location,
        })
    }

    /// Where the database lives, for log output.
    pub fn location(&self) -> &str {
        &self.location
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, PersistenceError> {
        self.connection
            .lock()
            .map_err(|_| PersistenceError::Worker("store connection lock poisoned".to_string()))
    }

    /// Write `batch` in one transaction, tables in [`LOAD_ORDER`].
    ///
    /// Entities are upserted on their natural keys, so persisting the same
    /// batch twice leaves the store unchanged. A creature's types and
    /// abilities are replaced by the ones in the batch. Relations whose parent
    /// row is missing are skipped and listed in the report; a nullable
    /// reference to a missing parent is written as NULL without clearing a
    /// previously stored value.
    ///
    /// # Errors
    /// Returns [`PersistenceError::Cancelled`] if `cancel` fires before the
    /// commit. Any error rolls the whole batch back.
    pub fn persist(
        &self,
        batch: &RecordBatch,
        cancel: &CancellationToken,
    ) -> Result<LoadReport, PersistenceError> {
        let mut connection = self.lock()?;
        let transaction = connection
            .transaction()
            .map_err(|e| PersistenceError::from_sqlite("begin batch transaction", e))?;

        let mut report = LoadReport::default();
        for table in LOAD_ORDER {
            if cancel.is_cancelled() {
                // Dropping the transaction rolls it back
                return Err(PersistenceError::Cancelled);
            }
            let written = write_table(&transaction, table, batch, &mut report)?;
            log::trace!("Wrote {} row(s) to {}", written, table);
            report.rows.insert(table.name(), written);
        }

        if cancel.is_cancelled() {
            return Err(PersistenceError::Cancelled);
        }
        transaction
            .commit()
            .map_err(|e| PersistenceError::from_sqlite("commit batch transaction", e))?;

        report.creatures = batch.creatures.keys().copied().collect();
        Ok(report)
    }

    /// Run a read-only query against the store.
    pub fn read<T>(
        &self,
        query: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, PersistenceError> {
        let connection = self.lock()?;
        query(&connection).map_err(|e| PersistenceError::from_sqlite("read store", e))
    }

    pub fn counts(&self) -> Result<TableCounts, PersistenceError> {
        self.read(|connection| {
            let mut counts = TableCounts::new();
            for table in LOAD_ORDER {
                let count: i64 = connection.query_row(
                    &format!("SELECT COUNT(*) FROM {}", table),
                    [],
                    |row| row.get(0),
                )?;
                counts.insert(table.name(), count.max(0) as u64);
            }
            Ok(counts)
        })
    }

    /// Number of rows whose foreign keys point at missing parents.
    pub fn foreign_key_violations(&self) -> Result<usize, PersistenceError> {
        self.read(|connection| {
            let mut statement = connection.prepare("PRAGMA foreign_key_check")?;
            let mut rows = statement.query([])?;
            let mut violations = 0;
            while rows.next()?.is_some() {
                violations += 1;
            }
            Ok(violations)
        })
    }
}

fn write_table(
    transaction: &Transaction<'_>,
    table: Table,
    batch: &RecordBatch,
    report: &mut LoadReport,
) -> Result<usize, PersistenceError> {
    match table {
        Table::Types => write_types(transaction, batch),
        Table::Abilities => write_abilities(transaction, batch),
        Table::EvolutionChains => {
            let rows: Vec<_> = batch
                .evolution_chains
                .values()
                .map(|chain| vec![int(chain.id), text(&chain.root_species)])
                .collect();
            EVOLUTION_CHAINS
                .execute(transaction, &rows)
                .map_err(|e| PersistenceError::from_sqlite("upsert evolution_chains", e))
        }
        Table::Species => write_species(transaction, batch, report),
        Table::Moves => {
            let rows: Vec<_> = batch
                .moves
                .values()
                .map(|m| {
                    vec![
                        text(&m.name),
                        opt_int(m.power),
                        opt_int(m.accuracy),
                        opt_int(m.pp),
                        text(m.damage_class.as_str()),
                        text(&m.type_name),
                        opt_text(m.description.as_deref()),
                    ]
                })
                .collect();
            MOVES
                .execute(transaction, &rows)
                .map_err(|e| PersistenceError::from_sqlite("upsert moves", e))
        }
        Table::Creatures => write_creatures(transaction, batch, report),
        Table::TypeEfficacy => write_type_efficacy(transaction, batch),
        Table::EvolutionLinks => write_evolution_links(transaction, batch),
        Table::CreatureTypes => write_creature_types(transaction, batch),
        Table::CreatureAbilities => write_creature_abilities(transaction, batch),
        Table::CreatureMoves => write_creature_moves(transaction, batch, report),
    }
}

fn write_types(transaction: &Transaction<'_>, batch: &RecordBatch) -> Result<usize, PersistenceError> {
    let full: Vec<_> = batch
        .types
        .values()
        .map(|t| vec![text(&t.name), opt_int(t.id)])
        .collect();
    let stubs: Vec<_> = batch
        .type_refs
        .iter()
        .filter(|name| !batch.types.contains_key(*name))
        .map(|name| vec![text(name)])
        .collect();

    let written = TYPES
        .execute(transaction, &full)
        .map_err(|e| PersistenceError::from_sqlite("upsert types", e))?;
    let stubbed = TYPE_STUBS
        .execute(transaction, &stubs)
        .map_err(|e| PersistenceError::from_sqlite("insert referenced types", e))?;
    Ok(written + stubbed)
}

fn write_abilities(
    transaction: &Transaction<'_>,
    batch: &RecordBatch,
) -> Result<usize, PersistenceError> {
    let full: Vec<_> = batch
        .abilities
        .values()
        .map(|a| {
            vec![
                text(&a.name),
                opt_text(a.effect.as_deref()),
                opt_text(a.short_effect.as_deref()),
            ]
        })
        .collect();
    let stubs: Vec<_> = batch
        .ability_refs
        .iter()
        .filter(|name| !batch.abilities.contains_key(*name))
        .map(|name| vec![text(name)])
        .collect();

    let written = ABILITIES
        .execute(transaction, &full)
        .map_err(|e| PersistenceError::from_sqlite("upsert abilities", e))?;
    let stubbed = ABILITY_STUBS
        .execute(transaction, &stubs)
        .map_err(|e| PersistenceError::from_sqlite("insert referenced abilities", e))?;
    Ok(written + stubbed)
}

fn write_species(
    transaction: &Transaction<'_>,
    batch: &RecordBatch,
    report: &mut LoadReport,
) -> Result<usize, PersistenceError> {
    let wanted: BTreeSet<i64> = batch
        .species
        .values()
        .filter_map(|s| s.evolution_chain_id)
        .collect();
    let known = existing_keys(transaction, "evolution_chains", "chain_id", &wanted)
        .map_err(|e| PersistenceError::from_sqlite("look up evolution_chains", e))?;

    let mut rows = Vec::with_capacity(batch.species.len());
    for species in batch.species.values() {
        let chain = match species.evolution_chain_id {
            Some(id) if known.contains(&id) => int(id),
            Some(id) => {
                report.skip(
                    "species.evolution_chain_id",
                    &species.name,
                    format!("evolution-chain/{}", id),
                );
                SqlValue::Null
            }
            None => SqlValue::Null,
        };
        let egg_groups = serde_json::to_string(&species.egg_groups)
            .map_err(|e| PersistenceError::Worker(format!("encode egg groups: {}", e)))?;
        rows.push(vec![
            text(&species.name),
            opt_text(species.genus.as_deref()),
            opt_text(species.flavor_text.as_deref()),
            opt_int(species.generation),
            int(species.gender_rate),
            int(species.capture_rate),
            opt_int(species.base_happiness),
            SqlValue::Text(egg_groups),
            int(species.is_legendary),
            int(species.is_mythical),
            chain,
        ]);
    }

    SPECIES
        .execute(transaction, &rows)
        .map_err(|e| PersistenceError::from_sqlite("upsert species", e))
}

fn write_creatures(
    transaction: &Transaction<'_>,
    batch: &RecordBatch,
    report: &mut LoadReport,
) -> Result<usize, PersistenceError> {
    let wanted: BTreeSet<String> = batch
        .creatures
        .values()
        .map(|c| c.species.clone())
        .collect();
    let known = existing_keys(transaction, "species", "name", &wanted)
        .map_err(|e| PersistenceError::from_sqlite("look up species", e))?;

    let rows: Vec<_> = batch
        .creatures
        .values()
        .map(|c| {
            let species = if known.contains(&c.species) {
                text(&c.species)
            } else {
                report.skip(
                    "creatures.species_name",
                    c.id.to_string(),
                    format!("pokemon-species/{}", c.species),
                );
                SqlValue::Null
            };
            vec![
                int(c.id),
                text(&c.name),
                int(c.height),
                int(c.weight),
                opt_int(c.base_experience),
                int(c.stats.hp),
                int(c.stats.attack),
                int(c.stats.defense),
                int(c.stats.special_attack),
                int(c.stats.special_defense),
                int(c.stats.speed),
                species,
                opt_text(c.sprite_front_default.as_deref()),
                opt_text(c.sprite_front_shiny.as_deref()),
            ]
        })
        .collect();

    CREATURES
        .execute(transaction, &rows)
        .map_err(|e| PersistenceError::from_sqlite("upsert creatures", e))
}

/// Replace the outgoing relations of every type in the batch.
fn write_type_efficacy(
    transaction: &Transaction<'_>,
    batch: &RecordBatch,
) -> Result<usize, PersistenceError> {
    let attackers: Vec<&String> = batch.types.keys().collect();
    delete_where_in(transaction, "type_efficacy", "attacker", &attackers)
        .map_err(|e| PersistenceError::from_sqlite("clear type_efficacy", e))?;

    let rows: Vec<_> = batch
        .type_efficacy
        .values()
        .map(|e| {
            vec![
                text(&e.attacker),
                text(&e.defender),
                int(e.damage_factor),
            ]
        })
        .collect();
    TYPE_EFFICACY
        .execute(transaction, &rows)
        .map_err(|e| PersistenceError::from_sqlite("upsert type_efficacy", e))
}

/// Replace the links of every chain in the batch.
fn write_evolution_links(
    transaction: &Transaction<'_>,
    batch: &RecordBatch,
) -> Result<usize, PersistenceError> {
    let chains: Vec<i64> = batch.evolution_chains.keys().copied().collect();
    delete_where_in(transaction, "evolution_links", "chain_id", &chains)
        .map_err(|e| PersistenceError::from_sqlite("clear evolution_links", e))?;

    let rows: Vec<_> = batch
        .evolution_links
        .values()
        .map(|l| {
            vec![
                int(l.chain_id),
                text(&l.from_species),
                text(&l.to_species),
                opt_int(l.min_level),
                opt_text(l.trigger.as_deref()),
            ]
        })
        .collect();
    EVOLUTION_LINKS
        .execute(transaction, &rows)
        .map_err(|e| PersistenceError::from_sqlite("upsert evolution_links", e))
}

fn write_creature_types(
    transaction: &Transaction<'_>,
    batch: &RecordBatch,
) -> Result<usize, PersistenceError> {
    let creatures: Vec<i64> = batch.creatures.keys().copied().collect();
    delete_where_in(transaction, "creature_types", "creature_id", &creatures)
        .map_err(|e| PersistenceError::from_sqlite("clear creature_types", e))?;

    let rows: Vec<_> = batch
        .creature_types
        .values()
        .filter(|t| batch.creatures.contains_key(&t.creature_id))
        .map(|t| vec![int(t.creature_id), text(&t.type_name), int(t.slot)])
        .collect();
    CREATURE_TYPES
        .execute(transaction, &rows)
        .map_err(|e| PersistenceError::from_sqlite("upsert creature_types", e))
}

fn write_creature_abilities(
    transaction: &Transaction<'_>,
    batch: &RecordBatch,
) -> Result<usize, PersistenceError> {
    let creatures: Vec<i64> = batch.creatures.keys().copied().collect();
    delete_where_in(transaction, "creature_abilities", "creature_id", &creatures)
        .map_err(|e| PersistenceError::from_sqlite("clear creature_abilities", e))?;

    let rows: Vec<_> = batch
        .creature_abilities
        .values()
        .filter(|a| batch.creatures.contains_key(&a.creature_id))
        .map(|a| {
            vec![
                int(a.creature_id),
                text(&a.ability_name),
                int(a.slot),
                int(a.is_hidden),
            ]
        })
        .collect();
    CREATURE_ABILITIES
        .execute(transaction, &rows)
        .map_err(|e| PersistenceError::from_sqlite("upsert creature_abilities", e))
}

/// Upsert learnable moves. Rows naming a move that is not stored are skipped.
fn write_creature_moves(
    transaction: &Transaction<'_>,
    batch: &RecordBatch,
    report: &mut LoadReport,
) -> Result<usize, PersistenceError> {
    let wanted: BTreeSet<String> = batch
        .creature_moves
        .values()
        .map(|m| m.move_name.clone())
        .collect();
    let known = existing_keys(transaction, "moves", "name", &wanted)
        .map_err(|e| PersistenceError::from_sqlite("look up moves", e))?;

    let mut rows = Vec::with_capacity(batch.creature_moves.len());
    for m in batch.creature_moves.values() {
        if !batch.creatures.contains_key(&m.creature_id) {
            continue;
        }
        if !known.contains(&m.move_name) {
            report.skip(
                "creature_moves",
                format!("{}/{}/{}", m.creature_id, m.move_name, m.learn_method),
                format!("move/{}", m.move_name),
            );
            continue;
        }
        rows.push(vec![
            int(m.creature_id),
            text(&m.move_name),
            text(m.learn_method.as_str()),
            opt_int(m.level),
        ]);
    }

    CREATURE_MOVES
        .execute(transaction, &rows)
        .map_err(|e| PersistenceError::from_sqlite("upsert creature_moves", e))
}
