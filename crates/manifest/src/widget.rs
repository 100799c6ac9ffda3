// SPDX-FileCopyrightText: Copyright © 2020-2026 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Legacy W3C widget `config.xml` support, feature-gated behind
//! `legacy-widget`. Translates the widget's `<feature>` elements into the
//! same canonical [`PermissionDeclarations`] shape the YAML front-end
//! produces, so the rest of the pipeline never sees a widget-specific type.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::{
    derive_id_underscore, derive_ver, permissions::Permission, Error, Manifest, Metadata,
    PermissionDeclarations, PermissionValue, Target,
};

const PERMISSION_PREFIX: &str = "urn:AGL:permission:";

fn default_true() -> bool {
    true
}

#[derive(Deserialize)]
struct WidgetFeature {
    #[serde(rename = "@name")]
    name: String,
    #[serde(default = "default_true", rename = "@required")]
    required: bool,
}

#[derive(Deserialize)]
struct WidgetContent {
    #[serde(rename = "@src")]
    src: String,
    #[serde(default, rename = "@type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct WidgetConfig {
    #[serde(rename = "@id")]
    id: String,
    #[serde(rename = "@version")]
    version: String,
    name: Option<String>,
    description: Option<String>,
    content: Option<WidgetContent>,
    #[serde(default, rename = "feature")]
    features: Vec<WidgetFeature>,
}

/// A feature's `required` attribute defaults to true when absent, matching
/// `getpropbool(node, wgt_config_string_required, 1)`.
fn feature_value(feature: &WidgetFeature) -> PermissionValue {
    if feature.required {
        PermissionValue::Required
    } else {
        PermissionValue::Optional
    }
}

pub(crate) fn parse(bytes: &[u8]) -> Result<Manifest, Error> {
    let widget: WidgetConfig = quick_xml::de::from_reader(bytes)?;

    let mut required_permissions: PermissionDeclarations = BTreeMap::new();
    for feature in &widget.features {
        let Some(name) = feature.name.strip_prefix(PERMISSION_PREFIX) else {
            continue;
        };
        let name = name.to_owned();
        let value = feature_value(feature);
        required_permissions.insert(name.clone(), Permission { name, value });
    }

    let targets = widget
        .content
        .into_iter()
        .map(|content| Target {
            name: "main".to_owned(),
            content_src: content.src,
            content_type: content.kind.unwrap_or_else(|| "text/html".to_owned()),
            required_permissions: PermissionDeclarations::new(),
            required_configs: Vec::new(),
            metatarget: None,
        })
        .collect();

    Ok(Manifest {
        ver: derive_ver(&widget.version),
        id_underscore: derive_id_underscore(&widget.id),
        idaver: widget.id.clone(),
        id: widget.id,
        version: widget.version,
        name: widget.name,
        description: widget.description,
        targets,
        plugs: Vec::new(),
        provided_bindings: Vec::new(),
        file_properties: BTreeMap::new(),
        required_permissions,
        metadata: Metadata::default(),
    })
}
