//! Diesel table definitions for the deploy platform.
//!
//! Tables: deploy_projects, deploy_build_numbers, deploy_builds,
//! deploy_streams, deploy_flows, deploy_releases, deploy_signoffs,
//! deploy_servers, deploy_targets, deploy_webhooks.

diesel::table! {
    deploy_projects (id) {
        id -> Int8,
        name -> Varchar,
        repo_url -> Varchar,
        branch -> Varchar,
        deploy_file -> Varchar,
        idhash -> Varchar,
        notifications -> Bool,
        slack_channel -> Varchar,
        release_stream_id -> Nullable<Int8>,
        build_script -> Varchar,
        package_name -> Varchar,
        postinstall_script -> Varchar,
        package_manager -> Varchar,
        deploy_type -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    deploy_build_numbers (id) {
        id -> Int8,
        package -> Varchar,
        build_num -> Int8,
    }
}

diesel::table! {
    deploy_builds (id) {
        id -> Int8,
        project_id -> Int8,
        build_time -> Timestamptz,
        state -> Int4,
        log -> Text,
        build_file -> Varchar,
    }
}

diesel::table! {
    deploy_streams (id) {
        id -> Int8,
        name -> Varchar,
        push_command -> Varchar,
    }
}

diesel::table! {
    deploy_flows (id) {
        id -> Int8,
        name -> Varchar,
        project_id -> Int8,
        stream_id -> Nullable<Int8>,
        stream_mode -> Int4,
        require_signoff -> Bool,
        signoff_list -> Text,
        quorum -> Int4,
        notify_list -> Text,
        service_restart -> Bool,
        service_pre_stop -> Bool,
        puppet_run -> Bool,
        auto_release -> Bool,
    }
}

diesel::table! {
    deploy_releases (id) {
        id -> Int8,
        flow_id -> Int8,
        build_id -> Int8,
        release_date -> Timestamptz,
        scheduled -> Nullable<Timestamptz>,
        waiting -> Bool,
        lock -> Bool,
    }
}

diesel::table! {
    deploy_signoffs (id) {
        id -> Int8,
        release_id -> Int8,
        signature -> Varchar,
        idhash -> Varchar,
        signed -> Bool,
    }
}

diesel::table! {
    deploy_servers (id) {
        id -> Int8,
        name -> Varchar,
        last_checkin -> Timestamptz,
        last_puppet_run -> Timestamptz,
        status -> Varchar,
        change -> Bool,
        agent_status -> Varchar,
    }
}

diesel::table! {
    deploy_targets (id) {
        id -> Int8,
        flow_id -> Int8,
        server_id -> Int8,
        deploy_state -> Int4,
        log -> Text,
        current_build_id -> Nullable<Int8>,
    }
}

diesel::table! {
    deploy_webhooks (id) {
        id -> Int8,
        flow_id -> Int8,
        description -> Varchar,
        url -> Varchar,
        method -> Varchar,
        content_type -> Varchar,
        payload -> Text,
        last_response -> Text,
    }
}

// Foreign key relationships
diesel::joinable!(deploy_projects -> deploy_streams (release_stream_id));
diesel::joinable!(deploy_builds -> deploy_projects (project_id));
diesel::joinable!(deploy_flows -> deploy_projects (project_id));
diesel::joinable!(deploy_flows -> deploy_streams (stream_id));
diesel::joinable!(deploy_releases -> deploy_flows (flow_id));
diesel::joinable!(deploy_releases -> deploy_builds (build_id));
diesel::joinable!(deploy_signoffs -> deploy_releases (release_id));
diesel::joinable!(deploy_targets -> deploy_flows (flow_id));
diesel::joinable!(deploy_targets -> deploy_servers (server_id));
diesel::joinable!(deploy_webhooks -> deploy_flows (flow_id));

diesel::allow_tables_to_appear_in_same_query!(
    deploy_projects,
    deploy_build_numbers,
    deploy_builds,
    deploy_streams,
    deploy_flows,
    deploy_releases,
    deploy_signoffs,
    deploy_servers,
    deploy_targets,
    deploy_webhooks,
);
