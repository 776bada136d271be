use std::path::Path;

use anyhow::Result;

use crate::{Catalog, SqliteStore};

pub(crate) const CATALOG_YAML: &str = r"
tables:
  band:
    display: band_name
    ordering: [band_name]
    columns:
      band_name: text
      beschreibung: text
      gruendung: date
      aktiv: bool
      jahr: integer
    relations:
      ort: { kind: many_to_one, column: ort_id, target: ort }
      bandalias: { kind: one_to_many, target: bandalias, remote_column: band_id }
      musiker:
        kind: many_to_many
        through: band_musiker
        source_column: band_id
        target_column: musiker_id
        target: musiker
  bandalias:
    columns:
      alias: text
  musiker:
    display: kuenstler_name
    ordering: ['-kuenstler_name']
    columns:
      kuenstler_name: text
  ort:
    columns:
      stadt: text
record_types:
  band:
    table: band
    search:
      search_fields: [band_name, bandalias.alias, beschreibung]
      primary_search_fields: [band_name]
      suffixes:
        bandalias.alias: Band-Alias
        beschreibung: Beschreibung
  musiker:
    table: musiker
    search:
      search_fields: [kuenstler_name]
";

pub(crate) const SEED_SQL: &str = r"
CREATE TABLE ort (id INTEGER PRIMARY KEY, stadt TEXT);
CREATE TABLE band (
  id INTEGER PRIMARY KEY,
  band_name TEXT NOT NULL,
  beschreibung TEXT,
  gruendung TEXT,
  aktiv INTEGER,
  jahr INTEGER,
  ort_id INTEGER REFERENCES ort(id)
);
CREATE TABLE bandalias (
  id INTEGER PRIMARY KEY,
  band_id INTEGER NOT NULL REFERENCES band(id),
  alias TEXT
);
CREATE TABLE musiker (id INTEGER PRIMARY KEY, kuenstler_name TEXT);
CREATE TABLE band_musiker (
  band_id INTEGER NOT NULL REFERENCES band(id),
  musiker_id INTEGER NOT NULL REFERENCES musiker(id)
);

INSERT INTO ort (id, stadt) VALUES (1, 'Los Angeles'), (2, 'Sydney');
INSERT INTO band (id, band_name, beschreibung, gruendung, aktiv, jahr, ort_id) VALUES
  (1, 'Guns ''N Roses', NULL, '1985-03-01', 1, 1985, 1),
  (2, 'AC/DC', '', '1973-11-01', 1, 1973, 2),
  (3, 'Acid House Kings', NULL, NULL, 0, 1991, NULL),
  (4, 'More Roses', 'Tribute to Guns ''N Roses', NULL, 1, 1985, 1),
  (5, 'Rolling Stones', NULL, '1962-07-12', 1, 1962, NULL);
INSERT INTO bandalias (band_id, alias) VALUES
  (1, 'Guns and Roses'), (1, 'GNR'), (2, 'ACDC'), (5, 'The Stones');
INSERT INTO musiker (id, kuenstler_name) VALUES (1, 'Axl Rose'), (2, 'Slash'), (3, 'Angus Young');
INSERT INTO band_musiker (band_id, musiker_id) VALUES (1, 1), (1, 2), (2, 3);
";

pub(crate) fn catalog() -> Catalog {
    match Catalog::from_yaml_str(CATALOG_YAML) {
        Ok(catalog) => catalog,
        Err(err) => panic!("fixture catalog should be valid: {err}"),
    }
}

pub(crate) fn seeded_store() -> Result<SqliteStore> {
    let store = SqliteStore::open(Path::new(":memory:"))?;
    store.connection().execute_batch(SEED_SQL)?;
    Ok(store)
}
