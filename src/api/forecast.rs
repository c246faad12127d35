use std::sync::Arc;

use reqwest::multipart::{Form, Part};
use serde_json::Value;
use tracing::{info, instrument};

use super::{range_query, ApiClient, RequestOptions};
use crate::dataset::UploadedDataset;
use crate::errors::ClientResult;
use crate::models::DateRange;

/// One upload of a dataset for a date window and store.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub dataset: Arc<UploadedDataset>,
    pub range: DateRange,
    pub store: String,
    /// Optional stock thresholds forwarded as a JSON form field
    pub thresholds: Option<Value>,
}

fn file_part(dataset: &UploadedDataset) -> ClientResult<Part> {
    Ok(Part::bytes(dataset.bytes.to_vec())
        .file_name(dataset.file_name.clone())
        .mime_str(dataset.format.mime_type())?)
}

impl ApiClient {
    /// `POST /api/forecast/upload-and-process`
    #[instrument(skip(self, request), fields(file = %request.dataset.file_name, store = %request.store, range = %request.range))]
    pub async fn upload_and_process(&self, request: &UploadRequest) -> ClientResult<Value> {
        let from = request.range.from.format("%Y-%m-%d").to_string();
        let to = request.range.to.format("%Y-%m-%d").to_string();

        let mut form = Form::new()
            .part("file", file_part(&request.dataset)?)
            .text("filter_from_date", from)
            .text("filter_to_date", to)
            .text("store", request.store.clone());

        if let Some(thresholds) = request
            .thresholds
            .as_ref()
            .filter(|t| t.as_object().map_or(true, |o| !o.is_empty()))
        {
            form = form.text("thresholds", serde_json::to_string(thresholds)?);
        }

        let mut options = RequestOptions::multipart(form);
        options.query = range_query(&request.range);

        let response = self
            .post("/api/forecast/upload-and-process", options)
            .await?;
        info!(bytes = request.dataset.bytes.len(), "dataset processed");
        Ok(response)
    }

    /// `POST /api/forecast/upload-and-process-sample`
    pub async fn upload_and_process_sample(&self) -> ClientResult<Value> {
        self.post(
            "/api/forecast/upload-and-process-sample",
            RequestOptions::default(),
        )
        .await
    }

    /// `POST /api/forecast/preview`, a quick look at the file before processing.
    #[instrument(skip(self, dataset), fields(file = %dataset.file_name))]
    pub async fn preview(&self, dataset: &UploadedDataset) -> ClientResult<Value> {
        let form = Form::new().part("file", file_part(dataset)?);
        self.post("/api/forecast/preview", RequestOptions::multipart(form))
            .await
    }

    /// `GET /api/forecast/sample-data`
    pub async fn sample_data(&self) -> ClientResult<Value> {
        self.get("/api/forecast/sample-data").await
    }
}
