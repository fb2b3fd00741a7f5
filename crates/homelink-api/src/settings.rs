// Settings and status endpoints
//
// Single-value reads and writes under `/settings/{key}` and `/status/{key}`,
// plus typed shortcuts for the attributes most callers care about.

use tracing::debug;

use crate::client::ApplianceClient;
use crate::error::Error;
use crate::models::{Value, parse_data};
use crate::resource::{Resource, ValueKind};
use crate::transport::ApiRequest;

impl ApplianceClient {
    /// Read a setting.
    ///
    /// `GET /api/homeappliances/{haId}/settings/{key}`
    pub async fn get_setting(&self, ha_id: &str, key: &str) -> Result<Value, Error> {
        self.get_value(ha_id, Self::appliance_path(ha_id, &format!("settings/{key}")))
            .await
    }

    /// Read a status value.
    ///
    /// `GET /api/homeappliances/{haId}/status/{key}`
    pub async fn get_status(&self, ha_id: &str, key: &str) -> Result<Value, Error> {
        self.get_value(ha_id, Self::appliance_path(ha_id, &format!("status/{key}")))
            .await
    }

    /// Write a setting, encoding the value per `kind`.
    ///
    /// `PUT /api/homeappliances/{haId}/settings/{key}` with
    /// `{"data": {"key", "value", "unit"?}}`
    pub async fn put_setting(
        &self,
        ha_id: &str,
        value: &Value,
        kind: ValueKind,
    ) -> Result<(), Error> {
        debug!(ha_id, key = %value.key, %kind, "writing setting");
        let path = Self::appliance_path(ha_id, &format!("settings/{}", value.key));
        self.put_data(ha_id, path, value.wire_json(kind)?).await
    }

    async fn get_value(&self, ha_id: &str, path: String) -> Result<Value, Error> {
        let response = self.send(ApiRequest::get(path).for_appliance(ha_id)).await?;
        parse_data(&response.body)
    }

    // ── Shortcuts ────────────────────────────────────────────────────

    pub async fn get_power_state(&self, ha_id: &str) -> Result<Value, Error> {
        self.get_setting(ha_id, Resource::POWER_STATE.key).await
    }

    pub async fn set_power_state(&self, ha_id: &str, state: &str) -> Result<(), Error> {
        let value = Value::new(Resource::POWER_STATE.key, state);
        self.put_setting(ha_id, &value, ValueKind::String).await
    }

    pub async fn get_door_state(&self, ha_id: &str) -> Result<Value, Error> {
        self.get_status(ha_id, Resource::DOOR_STATE.key).await
    }

    pub async fn get_operation_state(&self, ha_id: &str) -> Result<Value, Error> {
        self.get_status(ha_id, Resource::OPERATION_STATE.key).await
    }

    pub async fn is_remote_control_start_allowed(&self, ha_id: &str) -> Result<bool, Error> {
        Ok(self
            .get_status(ha_id, Resource::REMOTE_CONTROL_START_ALLOWED.key)
            .await?
            .as_bool())
    }

    pub async fn is_remote_control_active(&self, ha_id: &str) -> Result<bool, Error> {
        Ok(self
            .get_status(ha_id, Resource::REMOTE_CONTROL_ACTIVE.key)
            .await?
            .as_bool())
    }

    pub async fn is_local_control_active(&self, ha_id: &str) -> Result<bool, Error> {
        Ok(self
            .get_status(ha_id, Resource::LOCAL_CONTROL_ACTIVE.key)
            .await?
            .as_bool())
    }

    pub async fn get_fridge_setpoint_temperature(&self, ha_id: &str) -> Result<Value, Error> {
        self.get_setting(ha_id, Resource::FRIDGE_TEMPERATURE_SETPOINT.key)
            .await
    }

    pub async fn get_freezer_setpoint_temperature(&self, ha_id: &str) -> Result<Value, Error> {
        self.get_setting(ha_id, Resource::FREEZER_TEMPERATURE_SETPOINT.key)
            .await
    }

    /// Set the refrigerator setpoint in `unit` (normally `°C`).
    pub async fn set_fridge_setpoint_temperature(
        &self,
        ha_id: &str,
        value: &str,
        unit: &str,
    ) -> Result<(), Error> {
        let value = Value::new(Resource::FRIDGE_TEMPERATURE_SETPOINT.key, value).with_unit(unit);
        self.put_setting(ha_id, &value, ValueKind::Int).await
    }

    /// Set the freezer setpoint in `unit` (normally `°C`).
    pub async fn set_freezer_setpoint_temperature(
        &self,
        ha_id: &str,
        value: &str,
        unit: &str,
    ) -> Result<(), Error> {
        let value = Value::new(Resource::FREEZER_TEMPERATURE_SETPOINT.key, value).with_unit(unit);
        self.put_setting(ha_id, &value, ValueKind::Int).await
    }

    pub async fn get_fridge_super_mode(&self, ha_id: &str) -> Result<bool, Error> {
        self.get_flag(ha_id, &Resource::FRIDGE_SUPER_MODE).await
    }

    pub async fn set_fridge_super_mode(&self, ha_id: &str, enable: bool) -> Result<(), Error> {
        self.put_flag(ha_id, &Resource::FRIDGE_SUPER_MODE, enable)
            .await
    }

    pub async fn get_freezer_super_mode(&self, ha_id: &str) -> Result<bool, Error> {
        self.get_flag(ha_id, &Resource::FREEZER_SUPER_MODE).await
    }

    pub async fn set_freezer_super_mode(&self, ha_id: &str, enable: bool) -> Result<(), Error> {
        self.put_flag(ha_id, &Resource::FREEZER_SUPER_MODE, enable)
            .await
    }

    /// Oven cavity temperature, normally in `°C`.
    pub async fn get_current_cavity_temperature(&self, ha_id: &str) -> Result<Value, Error> {
        self.get_status(ha_id, Resource::OVEN_CAVITY_TEMPERATURE.key)
            .await
    }

    // ── Lighting ─────────────────────────────────────────────────────

    pub async fn get_ambient_light_state(&self, ha_id: &str) -> Result<bool, Error> {
        self.get_flag(ha_id, &Resource::AMBIENT_LIGHT_ENABLED).await
    }

    pub async fn set_ambient_light_state(&self, ha_id: &str, enable: bool) -> Result<(), Error> {
        self.put_flag(ha_id, &Resource::AMBIENT_LIGHT_ENABLED, enable)
            .await
    }

    pub async fn get_ambient_light_brightness(&self, ha_id: &str) -> Result<Value, Error> {
        self.get_setting(ha_id, Resource::AMBIENT_LIGHT_BRIGHTNESS.key)
            .await
    }

    /// Set ambient brightness in percent (the appliance accepts 10 to 100).
    pub async fn set_ambient_light_brightness(
        &self,
        ha_id: &str,
        percent: u8,
    ) -> Result<(), Error> {
        self.put_brightness(ha_id, &Resource::AMBIENT_LIGHT_BRIGHTNESS, percent)
            .await
    }

    pub async fn get_ambient_light_color(&self, ha_id: &str) -> Result<Value, Error> {
        self.get_setting(ha_id, Resource::AMBIENT_LIGHT_COLOR.key)
            .await
    }

    /// Set the color enum, e.g. `BSH.Common.EnumType.AmbientLightColor.CustomColor`.
    pub async fn set_ambient_light_color(&self, ha_id: &str, color: &str) -> Result<(), Error> {
        let value = Value::new(Resource::AMBIENT_LIGHT_COLOR.key, color);
        self.put_setting(ha_id, &value, ValueKind::String).await
    }

    pub async fn get_ambient_light_custom_color(&self, ha_id: &str) -> Result<Value, Error> {
        self.get_setting(ha_id, Resource::AMBIENT_LIGHT_CUSTOM_COLOR.key)
            .await
    }

    /// Set the custom color as a hex code such as `#ff8800`.
    pub async fn set_ambient_light_custom_color(
        &self,
        ha_id: &str,
        color: &str,
    ) -> Result<(), Error> {
        let value = Value::new(Resource::AMBIENT_LIGHT_CUSTOM_COLOR.key, color);
        self.put_setting(ha_id, &value, ValueKind::String).await
    }

    pub async fn get_functional_light_state(&self, ha_id: &str) -> Result<bool, Error> {
        self.get_flag(ha_id, &Resource::FUNCTIONAL_LIGHT_ENABLED)
            .await
    }

    pub async fn set_functional_light_state(&self, ha_id: &str, enable: bool) -> Result<(), Error> {
        self.put_flag(ha_id, &Resource::FUNCTIONAL_LIGHT_ENABLED, enable)
            .await
    }

    pub async fn get_functional_light_brightness(&self, ha_id: &str) -> Result<Value, Error> {
        self.get_setting(ha_id, Resource::FUNCTIONAL_LIGHT_BRIGHTNESS.key)
            .await
    }

    pub async fn set_functional_light_brightness(
        &self,
        ha_id: &str,
        percent: u8,
    ) -> Result<(), Error> {
        self.put_brightness(ha_id, &Resource::FUNCTIONAL_LIGHT_BRIGHTNESS, percent)
            .await
    }

    async fn get_flag(&self, ha_id: &str, resource: &Resource) -> Result<bool, Error> {
        Ok(self.get_setting(ha_id, resource.key).await?.as_bool())
    }

    async fn put_flag(&self, ha_id: &str, resource: &Resource, enable: bool) -> Result<(), Error> {
        let value = Value::new(resource.key, enable.to_string());
        self.put_setting(ha_id, &value, ValueKind::Bool).await
    }

    async fn put_brightness(
        &self,
        ha_id: &str,
        resource: &Resource,
        percent: u8,
    ) -> Result<(), Error> {
        let value = Value::new(resource.key, percent.to_string()).with_unit("%");
        self.put_setting(ha_id, &value, ValueKind::Int).await
    }
}
