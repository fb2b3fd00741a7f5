// Resource-aware reads and writes
//
// Maps a `Resource` onto the endpoint that serves its category, so callers
// holding a resource from the table never pick paths themselves.

use tracing::debug;

use crate::client::ApplianceClient;
use crate::error::Error;
use crate::models::{Program, Value};
use crate::programs::ProgramTarget;
use crate::resource::{Resource, ResourceCategory, ValueKind};

impl ApplianceClient {
    /// Read the current value of `resource`.
    ///
    /// Program resources are projected onto a [`Value`] keyed by the
    /// resource key: a bool-kind program resource reads `"true"` while a
    /// program is present, other kinds read the program key. An option
    /// resource reads that option of the active program. A missing program
    /// yields a value with no raw value.
    pub async fn read_resource(&self, ha_id: &str, resource: &Resource) -> Result<Value, Error> {
        debug!(ha_id, resource = resource.name, "reading resource");
        match resource.category {
            ResourceCategory::Setting => self.get_setting(ha_id, resource.key).await,
            ResourceCategory::Status => self.get_status(ha_id, resource.key).await,
            ResourceCategory::ProgramActive => {
                let program = self.get_active_program(ha_id).await?;
                Ok(program_value(resource, program.as_ref()))
            }
            ResourceCategory::ProgramSelected => {
                let program = self.get_selected_program(ha_id).await?;
                Ok(program_value(resource, program.as_ref()))
            }
            ResourceCategory::ProgramActiveOption => {
                let program = self.get_active_program(ha_id).await?;
                Ok(program
                    .as_ref()
                    .and_then(|p| p.option(resource.key))
                    .cloned()
                    .unwrap_or_else(|| Value::key_only(resource.key)))
            }
            ResourceCategory::ProgramAvailable | ResourceCategory::Event => {
                Err(Error::UnsupportedOperation(format!(
                    "reading {} resource {}",
                    resource.category, resource.name
                )))
            }
        }
    }

    /// Write `value` to `resource`.
    ///
    /// The value's own key is ignored; the resource key is used instead.
    /// For a bool-kind active-program resource `true` starts the selected
    /// program and `false` stops the running one.
    pub async fn write_resource(
        &self,
        ha_id: &str,
        resource: &Resource,
        value: &Value,
    ) -> Result<(), Error> {
        debug!(ha_id, resource = resource.name, "writing resource");
        let keyed = Value {
            key: resource.key.to_owned(),
            raw_value: value.raw_value.clone(),
            unit: value.unit.clone(),
        };
        match resource.category {
            ResourceCategory::Setting => self.put_setting(ha_id, &keyed, resource.kind).await,
            ResourceCategory::ProgramActive => match (resource.kind, value.raw()) {
                (ValueKind::Bool, _) if value.as_bool() => self.start_selected_program(ha_id).await,
                (ValueKind::Bool, _) | (_, None) => self.stop_program(ha_id).await,
                (_, Some(program_key)) => self.start_program(ha_id, program_key).await,
            },
            ResourceCategory::ProgramSelected => {
                let program_key = value
                    .raw()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| Error::Parse {
                        value: String::new(),
                        target: "program key",
                    })?;
                self.set_selected_program(ha_id, program_key).await
            }
            ResourceCategory::ProgramActiveOption => {
                self.set_program_options(ha_id, &keyed, resource.kind, ProgramTarget::Active)
                    .await
            }
            ResourceCategory::Status
            | ResourceCategory::ProgramAvailable
            | ResourceCategory::Event => Err(Error::UnsupportedOperation(format!(
                "writing {} resource {}",
                resource.category, resource.name
            ))),
        }
    }
}

fn program_value(resource: &Resource, program: Option<&Program>) -> Value {
    program_key_value(resource, program.map(|p| p.key.as_str()))
}

/// Project a program key onto an active/selected program resource.
///
/// Bool-kind resources read `"true"` for a non-empty key and `"false"`
/// otherwise; other kinds carry the key itself, or no raw value when
/// there is no program. Events for these resources carry the bare program
/// key, so both the read path and the event path go through here.
pub fn program_key_value(resource: &Resource, program_key: Option<&str>) -> Value {
    let program_key = program_key.map(str::trim).filter(|k| !k.is_empty());
    match (resource.kind, program_key) {
        (ValueKind::Bool, key) => Value::new(resource.key, key.is_some().to_string()),
        (_, Some(key)) => Value::new(resource.key, key),
        (_, None) => Value::key_only(resource.key),
    }
}
