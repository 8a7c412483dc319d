use cetane::prelude::*;

pub fn migration() -> Migration {
    Migration::new("0002_side_effects")
        .depends_on(&["0001_documents"])
        .operation(
            CreateTable::new("side_effect")
                .add_field(Field::new("effect_key", FieldType::Text).primary_key())
                .add_field(Field::new("response_json", FieldType::Text).not_null())
                .add_field(Field::new("created_at", FieldType::Text).not_null()),
        )
        // Row upserted first inside every SQLite effect transaction so the
        // transaction holds the write lock before it checks side_effect.
        .operation(
            CreateTable::new("effect_lock")
                .add_field(Field::new("effect_key", FieldType::Text).primary_key())
                .add_field(Field::new("acquired_at", FieldType::Text).not_null()),
        )
}
