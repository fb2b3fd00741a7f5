// Appliance listing endpoints

use tracing::{debug, warn};

use crate::client::ApplianceClient;
use crate::error::Error;
use crate::models::{ApplianceList, HomeAppliance, parse_data};
use crate::transport::ApiRequest;

impl ApplianceClient {
    /// List every appliance paired with the account.
    ///
    /// `GET /api/homeappliances`
    pub async fn get_home_appliances(&self) -> Result<Vec<HomeAppliance>, Error> {
        debug!("listing home appliances");
        let response = self.send(ApiRequest::get("/api/homeappliances")).await?;
        match parse_data::<ApplianceList>(&response.body) {
            Ok(list) => Ok(list.homeappliances),
            Err(e) => {
                warn!(error = %e, "unexpected appliance list shape, returning no appliances");
                Ok(Vec::new())
            }
        }
    }

    /// Get one appliance.
    ///
    /// `GET /api/homeappliances/{haId}`
    pub async fn get_home_appliance(&self, ha_id: &str) -> Result<HomeAppliance, Error> {
        let path = Self::appliance_path(ha_id, "");
        let response = self.send(ApiRequest::get(path).for_appliance(ha_id)).await?;
        parse_data(&response.body)
    }
}
