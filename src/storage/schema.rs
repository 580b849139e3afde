//! Table definitions and their dependency order

use crate::error::PersistenceError;
use rusqlite::{Connection, OptionalExtension, Transaction};
use std::fmt;

pub const SCHEMA_VERSION: i64 = 1;

/// Tables of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Types,
    Abilities,
    EvolutionChains,
    Species,
    Moves,
    Creatures,
    TypeEfficacy,
    EvolutionLinks,
    CreatureTypes,
    CreatureAbilities,
    CreatureMoves,
}

/// Write order for one batch: every table comes after the tables it
/// references.
pub const LOAD_ORDER: [Table; 11] = [
    Table::Types,
    Table::Abilities,
    Table::EvolutionChains,
    Table::Species,
    Table::Moves,
    Table::Creatures,
    Table::TypeEfficacy,
    Table::EvolutionLinks,
    Table::CreatureTypes,
    Table::CreatureAbilities,
    Table::CreatureMoves,
];

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Types => "types",
            Self::Abilities => "abilities",
            Self::EvolutionChains => "evolution_chains",
            Self::Species => "species",
            Self::Moves => "moves",
            Self::Creatures => "creatures",
            Self::TypeEfficacy => "type_efficacy",
            Self::EvolutionLinks => "evolution_links",
            Self::CreatureTypes => "creature_types",
            Self::CreatureAbilities => "creature_abilities",
            Self::CreatureMoves => "creature_moves",
        }
    }

    /// Tables this table holds foreign keys into.
    pub fn parents(&self) -> &'static [Table] {
        match self {
            Self::Types | Self::Abilities | Self::EvolutionChains => &[],
            Self::Species => &[Table::EvolutionChains],
            Self::Moves => &[Table::Types],
            Self::Creatures => &[Table::Species],
            Self::TypeEfficacy => &[Table::Types],
            Self::EvolutionLinks => &[Table::EvolutionChains],
            Self::CreatureTypes => &[Table::Creatures, Table::Types],
            Self::CreatureAbilities => &[Table::Creatures, Table::Abilities],
            Self::CreatureMoves => &[Table::Creatures, Table::Moves],
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Create the schema in `connection` if it is not there yet.
///
/// Enables foreign key enforcement, creates tables and indexes, and records
/// the schema version. A database carrying a different version is refused.
///
/// # Examples
/// ```
/// use pokedex_sync::storage::initialise_schema;
/// use rusqlite::Connection;
///
/// let mut conn = Connection::open_in_memory().unwrap();
/// initialise_schema(&mut conn).unwrap();
/// // Running it again is a no-op
/// initialise_schema(&mut conn).unwrap();
///
/// let tables: i64 = conn
///     .query_row(
///         "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'creature_moves'",
///         [],
///         |row| row.get(0),
///     )
///     .unwrap();
/// assert_eq!(tables, 1);
/// ```
pub fn initialise_schema(connection: &mut Connection) -> Result<(), PersistenceError> {
    connection
        .pragma_update(None, "foreign_keys", true)
        .map_err(|e| PersistenceError::from_sqlite("enable foreign keys", e))?;

    let transaction = connection
        .transaction()
        .map_err(|e| PersistenceError::from_sqlite("begin schema transaction", e))?;

    create_entity_tables(&transaction)?;
    create_relation_tables(&transaction)?;
    create_indexes(&transaction)?;
    ensure_schema_version(&transaction)?;

    transaction
        .commit()
        .map_err(|e| PersistenceError::from_sqlite("commit schema transaction", e))
}

fn create_entity_tables(transaction: &Transaction<'_>) -> Result<(), PersistenceError> {
    run_migration_step(
        transaction,
        "create types",
        "CREATE TABLE IF NOT EXISTS types (
            name TEXT PRIMARY KEY CHECK (length(trim(name)) > 0),
            source_id INTEGER
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create abilities",
        "CREATE TABLE IF NOT EXISTS abilities (
            name TEXT PRIMARY KEY CHECK (length(trim(name)) > 0),
            effect TEXT,
            short_effect TEXT
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create evolution_chains",
        "CREATE TABLE IF NOT EXISTS evolution_chains (
            chain_id INTEGER PRIMARY KEY,
            root_species TEXT NOT NULL CHECK (length(trim(root_species)) > 0)
        )",
    )?;
    run_migration_step(
        transaction,
        "create species",
        "CREATE TABLE IF NOT EXISTS species (
            name TEXT PRIMARY KEY CHECK (length(trim(name)) > 0),
            genus TEXT,
            flavor_text TEXT,
            generation INTEGER CHECK (generation IS NULL OR generation > 0),
            gender_rate INTEGER NOT NULL CHECK (gender_rate BETWEEN -1 AND 8),
            capture_rate INTEGER NOT NULL CHECK (capture_rate BETWEEN 0 AND 255),
            base_happiness INTEGER CHECK (base_happiness IS NULL OR base_happiness BETWEEN 0 AND 255),
            egg_groups TEXT NOT NULL DEFAULT '[]',
            is_legendary INTEGER NOT NULL DEFAULT 0,
            is_mythical INTEGER NOT NULL DEFAULT 0,
            evolution_chain_id INTEGER,
            FOREIGN KEY (evolution_chain_id) REFERENCES evolution_chains(chain_id) ON DELETE SET NULL
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create moves",
        "CREATE TABLE IF NOT EXISTS moves (
            name TEXT PRIMARY KEY CHECK (length(trim(name)) > 0),
            power INTEGER CHECK (power IS NULL OR power >= 0),
            accuracy INTEGER CHECK (accuracy IS NULL OR accuracy BETWEEN 0 AND 100),
            pp INTEGER CHECK (pp IS NULL OR pp >= 0),
            damage_class TEXT NOT NULL CHECK (damage_class IN ('physical', 'special', 'status')),
            type_name TEXT NOT NULL,
            description TEXT,
            FOREIGN KEY (type_name) REFERENCES types(name)
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create creatures",
        "CREATE TABLE IF NOT EXISTS creatures (
            id INTEGER PRIMARY KEY CHECK (id > 0),
            name TEXT NOT NULL UNIQUE CHECK (length(trim(name)) > 0),
            height INTEGER NOT NULL CHECK (height >= 0),
            weight INTEGER NOT NULL CHECK (weight >= 0),
            base_experience INTEGER CHECK (base_experience IS NULL OR base_experience >= 0),
            hp INTEGER NOT NULL CHECK (hp >= 0),
            attack INTEGER NOT NULL CHECK (attack >= 0),
            defense INTEGER NOT NULL CHECK (defense >= 0),
            special_attack INTEGER NOT NULL CHECK (special_attack >= 0),
            special_defense INTEGER NOT NULL CHECK (special_defense >= 0),
            speed INTEGER NOT NULL CHECK (speed >= 0),
            species_name TEXT,
            sprite_front_default TEXT,
            sprite_front_shiny TEXT,
            FOREIGN KEY (species_name) REFERENCES species(name) ON DELETE SET NULL
        )",
    )
}

fn create_relation_tables(transaction: &Transaction<'_>) -> Result<(), PersistenceError> {
    run_migration_step(
        transaction,
        "create type_efficacy",
        "CREATE TABLE IF NOT EXISTS type_efficacy (
            attacker TEXT NOT NULL,
            defender TEXT NOT NULL,
            damage_factor INTEGER NOT NULL CHECK (damage_factor IN (0, 50, 200)),
            PRIMARY KEY (attacker, defender),
            FOREIGN KEY (attacker) REFERENCES types(name) ON DELETE CASCADE,
            FOREIGN KEY (defender) REFERENCES types(name) ON DELETE CASCADE
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create evolution_links",
        "CREATE TABLE IF NOT EXISTS evolution_links (
            chain_id INTEGER NOT NULL,
            from_species TEXT NOT NULL,
            to_species TEXT NOT NULL,
            min_level INTEGER CHECK (min_level IS NULL OR min_level >= 0),
            trigger_name TEXT,
            PRIMARY KEY (chain_id, from_species, to_species),
            CHECK (from_species <> to_species),
            FOREIGN KEY (chain_id) REFERENCES evolution_chains(chain_id) ON DELETE CASCADE
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create creature_types",
        "CREATE TABLE IF NOT EXISTS creature_types (
            creature_id INTEGER NOT NULL,
            type_name TEXT NOT NULL,
            slot INTEGER NOT NULL CHECK (slot > 0),
            PRIMARY KEY (creature_id, type_name),
            FOREIGN KEY (creature_id) REFERENCES creatures(id) ON DELETE CASCADE,
            FOREIGN KEY (type_name) REFERENCES types(name) ON DELETE CASCADE
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create creature_abilities",
        "CREATE TABLE IF NOT EXISTS creature_abilities (
            creature_id INTEGER NOT NULL,
            ability_name TEXT NOT NULL,
            slot INTEGER NOT NULL CHECK (slot > 0),
            is_hidden INTEGER NOT NULL DEFAULT 0,
            PRIMARY KEY (creature_id, ability_name),
            FOREIGN KEY (creature_id) REFERENCES creatures(id) ON DELETE CASCADE,
            FOREIGN KEY (ability_name) REFERENCES abilities(name) ON DELETE CASCADE
        ) WITHOUT ROWID",
    )?;
    run_migration_step(
        transaction,
        "create creature_moves",
        "CREATE TABLE IF NOT EXISTS creature_moves (
            creature_id INTEGER NOT NULL,
            move_name TEXT NOT NULL,
            learn_method TEXT NOT NULL
                CHECK (learn_method IN ('level-up', 'egg', 'tutor', 'machine')),
            level INTEGER CHECK (level IS NULL OR level >= 0),
            PRIMARY KEY (creature_id, move_name, learn_method),
            CHECK ((learn_method = 'level-up') = (level IS NOT NULL)),
            FOREIGN KEY (creature_id) REFERENCES creatures(id) ON DELETE CASCADE,
            FOREIGN KEY (move_name) REFERENCES moves(name) ON DELETE CASCADE
        ) WITHOUT ROWID",
    )
}

fn create_indexes(transaction: &Transaction<'_>) -> Result<(), PersistenceError> {
    run_migration_step(
        transaction,
        "index species by chain",
        "CREATE INDEX IF NOT EXISTS idx_species_chain ON species(evolution_chain_id)",
    )?;
    run_migration_step(
        transaction,
        "index moves by type",
        "CREATE INDEX IF NOT EXISTS idx_moves_type ON moves(type_name)",
    )?;
    run_migration_step(
        transaction,
        "index creatures by species",
        "CREATE INDEX IF NOT EXISTS idx_creatures_species ON creatures(species_name)",
    )?;
    run_migration_step(
        transaction,
        "index creature_types by type",
        "CREATE INDEX IF NOT EXISTS idx_creature_types_type ON creature_types(type_name, creature_id)",
    )?;
    run_migration_step(
        transaction,
        "index creature_abilities by ability",
        "CREATE INDEX IF NOT EXISTS idx_creature_abilities_ability
            ON creature_abilities(ability_name, creature_id)",
    )?;
    run_migration_step(
        transaction,
        "index creature_moves by move",
        "CREATE INDEX IF NOT EXISTS idx_creature_moves_move ON creature_moves(move_name, creature_id)",
    )?;
    run_migration_step(
        transaction,
        "index type_efficacy by defender",
        "CREATE INDEX IF NOT EXISTS idx_type_efficacy_defender ON type_efficacy(defender, attacker)",
    )
}

fn ensure_schema_version(transaction: &Transaction<'_>) -> Result<(), PersistenceError> {
    run_migration_step(
        transaction,
        "create schema version table",
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY CHECK (version > 0),
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ) WITHOUT ROWID",
    )?;

    let existing: Option<i64> = transaction
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .optional()
        .map_err(|e| PersistenceError::from_sqlite("read schema version", e))?;

    match existing {
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(PersistenceError::SchemaMismatch {
            found,
            expected: SCHEMA_VERSION,
        }),
        None => {
            transaction
                .execute(
                    "INSERT INTO schema_version (version) VALUES (?1)",
                    [SCHEMA_VERSION],
                )
                .map_err(|e| PersistenceError::from_sqlite("record schema version", e))?;
            Ok(())
        }
    }
}

fn run_migration_step(
    transaction: &Transaction<'_>,
    step: &'static str,
    sql: &str,
) -> Result<(), PersistenceError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|e| PersistenceError::from_sqlite(step, e))
}
