// Program endpoints
//
// Active/selected program reads and writes, program options and the
// available-program listings under `/programs`.

use serde_json::json;
use tracing::{debug, warn};

use crate::client::ApplianceClient;
use crate::error::Error;
use crate::models::{
    AvailableProgram, Program, ProgramOption, Value, parse_available_programs, parse_data,
    parse_program_options,
};
use crate::resource::ValueKind;
use crate::transport::ApiRequest;

/// Which program an options write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgramTarget {
    Active,
    Selected,
}

impl ProgramTarget {
    fn segment(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Selected => "selected",
        }
    }
}

impl ApplianceClient {
    // ── Active / selected ────────────────────────────────────────────

    /// The running program, or `None` when nothing runs (404).
    ///
    /// `GET /api/homeappliances/{haId}/programs/active`
    pub async fn get_active_program(&self, ha_id: &str) -> Result<Option<Program>, Error> {
        self.get_program(ha_id, ProgramTarget::Active).await
    }

    /// The selected program, or `None` when nothing is selected (404).
    ///
    /// `GET /api/homeappliances/{haId}/programs/selected`
    pub async fn get_selected_program(&self, ha_id: &str) -> Result<Option<Program>, Error> {
        self.get_program(ha_id, ProgramTarget::Selected).await
    }

    async fn get_program(
        &self,
        ha_id: &str,
        target: ProgramTarget,
    ) -> Result<Option<Program>, Error> {
        let path = Self::appliance_path(ha_id, &format!("programs/{}", target.segment()));
        let response = self
            .send(ApiRequest::get(path).expect(&[200, 404]).for_appliance(ha_id))
            .await?;
        if response.status == 404 {
            return Ok(None);
        }
        parse_data(&response.body).map(Some)
    }

    /// `PUT /api/homeappliances/{haId}/programs/selected` with `{"data":{"key"}}`
    pub async fn set_selected_program(&self, ha_id: &str, program_key: &str) -> Result<(), Error> {
        debug!(ha_id, program_key, "selecting program");
        let path = Self::appliance_path(ha_id, "programs/selected");
        self.put_data(ha_id, path, json!({ "key": program_key })).await
    }

    /// `PUT /api/homeappliances/{haId}/programs/active` with `{"data":{"key"}}`
    pub async fn start_program(&self, ha_id: &str, program_key: &str) -> Result<(), Error> {
        debug!(ha_id, program_key, "starting program");
        let path = Self::appliance_path(ha_id, "programs/active");
        self.put_data(ha_id, path, json!({ "key": program_key })).await
    }

    /// Start whatever program is selected, with its current options.
    ///
    /// The selected-program document is copied verbatim to the active
    /// program path. Does nothing when no program is selected.
    pub async fn start_selected_program(&self, ha_id: &str) -> Result<(), Error> {
        let selected = Self::appliance_path(ha_id, "programs/selected");
        let response = self
            .send(ApiRequest::get(selected).expect(&[200, 404]).for_appliance(ha_id))
            .await?;
        if response.status == 404 {
            debug!(ha_id, "no program selected, nothing to start");
            return Ok(());
        }
        self.start_custom_program(ha_id, &response.body).await
    }

    /// PUT a caller-provided program document to the active program path.
    pub async fn start_custom_program(&self, ha_id: &str, json: &str) -> Result<(), Error> {
        let path = Self::appliance_path(ha_id, "programs/active");
        self.send(ApiRequest::put(path, json).for_appliance(ha_id))
            .await?;
        Ok(())
    }

    /// Set one option on the active or selected program.
    ///
    /// `PUT .../programs/{active|selected}/options` with
    /// `{"data":{"options":[{"key","value","unit"?}]}}`
    pub async fn set_program_options(
        &self,
        ha_id: &str,
        option: &Value,
        kind: ValueKind,
        target: ProgramTarget,
    ) -> Result<(), Error> {
        debug!(ha_id, key = %option.key, ?target, "setting program option");
        let path = Self::appliance_path(ha_id, &format!("programs/{}/options", target.segment()));
        self.put_data(ha_id, path, json!({ "options": [option.wire_json(kind)?] }))
            .await
    }

    /// `DELETE /api/homeappliances/{haId}/programs/active`
    pub async fn stop_program(&self, ha_id: &str) -> Result<(), Error> {
        debug!(ha_id, "stopping program");
        let path = Self::appliance_path(ha_id, "programs/active");
        self.send(ApiRequest::delete(path).for_appliance(ha_id))
            .await?;
        Ok(())
    }

    // ── Listings ─────────────────────────────────────────────────────

    /// All programs the appliance knows.
    ///
    /// `GET /api/homeappliances/{haId}/programs`
    pub async fn get_programs(&self, ha_id: &str) -> Result<Vec<AvailableProgram>, Error> {
        self.list_programs(ha_id, "programs").await
    }

    /// Programs that can be started in the appliance's current state.
    ///
    /// `GET /api/homeappliances/{haId}/programs/available`
    pub async fn get_available_programs(
        &self,
        ha_id: &str,
    ) -> Result<Vec<AvailableProgram>, Error> {
        self.list_programs(ha_id, "programs/available").await
    }

    async fn list_programs(
        &self,
        ha_id: &str,
        suffix: &str,
    ) -> Result<Vec<AvailableProgram>, Error> {
        let path = Self::appliance_path(ha_id, suffix);
        let response = self.send(ApiRequest::get(path).for_appliance(ha_id)).await?;
        Ok(parse_available_programs(&response.body).unwrap_or_else(|| {
            warn!(ha_id, "unexpected program list shape, returning no programs");
            Vec::new()
        }))
    }

    /// Options of an available program and their allowed values.
    ///
    /// Cached per program key for the lifetime of this client.
    /// `GET /api/homeappliances/{haId}/programs/available/{programKey}`
    pub async fn get_program_options(
        &self,
        ha_id: &str,
        program_key: &str,
    ) -> Result<Vec<ProgramOption>, Error> {
        if let Some(cached) = self.option_cache.get(program_key) {
            debug!(program_key, "returning cached program options");
            return Ok(cached.clone());
        }

        let path = Self::appliance_path(ha_id, &format!("programs/available/{program_key}"));
        let response = self.send(ApiRequest::get(path).for_appliance(ha_id)).await?;
        let Some(options) = parse_program_options(&response.body) else {
            warn!(ha_id, program_key, "unexpected program options shape, returning no options");
            return Ok(Vec::new());
        };
        self.option_cache
            .insert(program_key.to_owned(), options.clone());
        Ok(options)
    }
}
