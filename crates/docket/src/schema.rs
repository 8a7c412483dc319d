// Diesel table definitions. Kept in sync with the cetane migrations in
// `crate::migrations`; every integer column is BigInt so the same models
// load on SQLite and PostgreSQL.

diesel::table! {
    doc (doc_id) {
        doc_id -> Text,
        raw_sha -> Text,
        filename -> Text,
        mime -> Text,
        byte_len -> BigInt,
        latest_ver -> BigInt,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    doc_version (doc_id, ver) {
        doc_id -> Text,
        ver -> BigInt,
        raw_sha -> Text,
        parser_config_sha -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    block (doc_id, ver, block_id) {
        doc_id -> Text,
        ver -> BigInt,
        block_id -> Text,
        #[sql_name = "type"]
        block_type -> Text,
        page -> BigInt,
        bbox -> Nullable<Text>,
        text -> Nullable<Text>,
        data -> Text,
        block_sha -> Text,
        prov -> Text,
        search_text -> Nullable<Text>,
    }
}

diesel::table! {
    side_effect (effect_key) {
        effect_key -> Text,
        response_json -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    effect_lock (effect_key) {
        effect_key -> Text,
        acquired_at -> Text,
    }
}

diesel::table! {
    artifact (artifact_id) {
        artifact_id -> Text,
        run_id -> Text,
        artifact_type -> Text,
        format -> Text,
        uri -> Text,
        sha256 -> Text,
        prov -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    ocr_job (job_id) {
        job_id -> Text,
        doc_id -> Text,
        ver -> BigInt,
        gate_rev -> Text,
        policy -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    ocr_page (job_id, page_idx) {
        job_id -> Text,
        page_idx -> BigInt,
        status -> Text,
        gate_score -> Nullable<Double>,
        gate_reasons -> Text,
        png_uri -> Nullable<Text>,
        png_sha -> Nullable<Text>,
        raw_uri -> Nullable<Text>,
        raw_sha -> Nullable<Text>,
        updated_at -> Text,
    }
}

diesel::table! {
    ocr_patch (doc_id, ver, page_idx, patch_sha) {
        doc_id -> Text,
        ver -> BigInt,
        page_idx -> BigInt,
        patch_sha -> Text,
        patch -> Text,
        source_job_id -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    page_diff (doc_id, ver, page_idx, page_diff_sha) {
        doc_id -> Text,
        ver -> BigInt,
        page_idx -> BigInt,
        before_sha -> Text,
        after_sha -> Text,
        changed_blocks -> BigInt,
        page_diff_sha -> Text,
        created_at -> Text,
    }
}

diesel::table! {
    docir_page_version (doc_id, ver, page_idx, page_sha) {
        doc_id -> Text,
        ver -> BigInt,
        page_idx -> BigInt,
        page_sha -> Text,
        source -> Text,
        source_ref_sha -> Nullable<Text>,
        created_at -> Text,
    }
}

diesel::table! {
    workflow_step (run_id, step_name) {
        run_id -> Text,
        step_name -> Text,
        status -> Text,
        output_json -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    workflow_event (event_id) {
        event_id -> BigInt,
        run_id -> Text,
        step_name -> Text,
        phase -> Text,
        payload_json -> Text,
        created_at -> Text,
    }
}

diesel::joinable!(doc_version -> doc (doc_id));

diesel::allow_tables_to_appear_in_same_query!(
    doc,
    doc_version,
    block,
    side_effect,
    effect_lock,
    artifact,
    ocr_job,
    ocr_page,
    ocr_patch,
    page_diff,
    docir_page_version,
    workflow_step,
    workflow_event,
);
