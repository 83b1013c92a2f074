//! Contract descriptors: the ABI document plus the address it is deployed at.
//!
//! Accepts either a bare JSON ABI array or a truffle build artifact
//! (`contractName`, `abi`, `networks.<id>.address`).

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use alloy::dyn_abi::{DynSolType, DynSolValue, Specifier};
use alloy::json_abi::{Event, Function, JsonAbi, Param};
use alloy::primitives::{Address, B256, Bytes};
use serde::Deserialize;

use crate::error::{DecodeError, DescriptorError};

#[derive(Deserialize)]
#[serde(untagged)]
enum DescriptorDocument {
    Artifact(TruffleArtifact),
    Abi(JsonAbi),
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TruffleArtifact {
    contract_name: String,
    abi: JsonAbi,
    #[serde(default)]
    networks: HashMap<String, NetworkDeployment>,
}

#[derive(Deserialize)]
struct NetworkDeployment {
    address: Address,
}

/// ABI plus deployment address of the contract a proxy talks to.
#[derive(Debug, Clone)]
pub struct ContractDescriptor {
    name: Option<String>,
    address: Address,
    abi: Arc<ContractAbi>,
}

impl ContractDescriptor {
    pub fn new(abi: ContractAbi, address: Address) -> Self {
        Self {
            name: None,
            address,
            abi: Arc::new(abi),
        }
    }

    /// Parse a descriptor document. An explicit `address` wins over the
    /// artifact's deployment table; `network_id` picks an entry from it.
    pub fn from_json(
        json: &str,
        address: Option<Address>,
        network_id: Option<&str>,
    ) -> Result<Self, DescriptorError> {
        let (name, abi, networks) = match serde_json::from_str(json)? {
            DescriptorDocument::Artifact(artifact) => (
                Some(artifact.contract_name),
                artifact.abi,
                artifact.networks,
            ),
            DescriptorDocument::Abi(abi) => (None, abi, HashMap::new()),
        };

        let address = match address {
            Some(address) => address,
            None => resolve_deployment(&networks, network_id)?,
        };

        Ok(Self {
            name,
            address,
            abi: Arc::new(ContractAbi::new(abi)),
        })
    }

    pub fn load(
        path: &Path,
        address: Option<Address>,
        network_id: Option<&str>,
    ) -> Result<Self, DescriptorError> {
        let json = fs::read_to_string(path).map_err(|source| DescriptorError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json, address, network_id)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn abi(&self) -> &Arc<ContractAbi> {
        &self.abi
    }
}

fn resolve_deployment(
    networks: &HashMap<String, NetworkDeployment>,
    network_id: Option<&str>,
) -> Result<Address, DescriptorError> {
    match network_id {
        Some(id) => networks
            .get(id)
            .map(|deployment| deployment.address)
            .ok_or_else(|| DescriptorError::NoDeployment(id.to_string())),
        None => {
            let mut deployments = networks.iter();
            match (deployments.next(), deployments.next()) {
                (Some((_, deployment)), None) => Ok(deployment.address),
                (None, _) => Err(DescriptorError::NoDeployment("<any>".to_string())),
                _ => {
                    let mut ids: Vec<String> = networks.keys().cloned().collect();
                    ids.sort();
                    Err(DescriptorError::AmbiguousDeployment(ids))
                }
            }
        }
    }
}

/// A JSON ABI with the encode/decode helpers the client needs.
#[derive(Debug, Clone)]
pub struct ContractAbi {
    abi: JsonAbi,
    event_names: HashMap<B256, String>,
}

impl ContractAbi {
    pub fn new(abi: JsonAbi) -> Self {
        let event_names = abi
            .events()
            .filter(|event| !event.anonymous)
            .map(|event| (event.selector(), event.name.clone()))
            .collect();
        Self { abi, event_names }
    }

    pub fn from_json(json: &str) -> Result<Self, DescriptorError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn json_abi(&self) -> &JsonAbi {
        &self.abi
    }

    /// The overload of `name` taking `arity` arguments.
    pub fn function(&self, name: &str, arity: usize) -> Result<&Function, DecodeError> {
        let overloads = self
            .abi
            .function(name)
            .ok_or_else(|| DecodeError::UnknownMethod(name.to_string()))?;
        overloads
            .iter()
            .find(|f| f.inputs.len() == arity)
            .ok_or_else(|| DecodeError::ArgumentCount {
                name: name.to_string(),
                expected: overloads.first().map_or(0, |f| f.inputs.len()),
                got: arity,
            })
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.abi.function(name).is_some()
    }

    pub fn event(&self, name: &str) -> Result<&Event, DecodeError> {
        self.abi
            .event(name)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| DecodeError::UnknownEvent(name.to_string()))
    }

    /// Name of the event whose selector is `topic0`.
    pub fn event_name(&self, topic0: &B256) -> Option<&str> {
        self.event_names.get(topic0).map(String::as_str)
    }

    /// Selector-prefixed calldata for `name(args...)`. Arguments are checked
    /// against the ABI before encoding.
    pub fn encode_call(&self, name: &str, args: &[DynSolValue]) -> Result<Bytes, DecodeError> {
        let function = self.function(name, args.len())?;
        let types = resolve_params(name, &function.inputs)?;
        for (index, (ty, value)) in types.iter().zip(args).enumerate() {
            if !ty.matches(value) {
                return Err(DecodeError::ArgumentType {
                    name: name.to_string(),
                    index,
                    expected: ty.sol_type_name().into_owned(),
                });
            }
        }

        let mut input = function.selector().to_vec();
        input.extend(DynSolValue::Tuple(args.to_vec()).abi_encode_params());
        Ok(input.into())
    }

    /// Decode calldata back into the method name and its arguments.
    pub fn decode_call(&self, input: &[u8]) -> Result<(String, Vec<DynSolValue>), DecodeError> {
        if input.len() < 4 {
            return Err(DecodeError::Abi {
                name: "<calldata>".to_string(),
                reason: format!("{} bytes is too short for a selector", input.len()),
            });
        }
        let (selector, body) = input.split_at(4);
        let function = self
            .abi
            .functions()
            .find(|f| f.selector().as_slice() == selector)
            .ok_or_else(|| DecodeError::UnknownMethod(format!("0x{}", hex::encode(selector))))?;
        let types = resolve_params(&function.name, &function.inputs)?;
        let values = decode_tuple(&function.name, types, body)?;
        Ok((function.name.clone(), values))
    }

    /// Decode the return data of `name`.
    pub fn decode_output(&self, name: &str, data: &[u8]) -> Result<Vec<DynSolValue>, DecodeError> {
        let function = self.first_function(name)?;
        let types = resolve_params(name, &function.outputs)?;
        decode_tuple(name, types, data)
    }

    /// Encode return data for `name`. Used by in-memory backends.
    pub fn encode_output(&self, name: &str, values: &[DynSolValue]) -> Result<Bytes, DecodeError> {
        let function = self.first_function(name)?;
        if function.outputs.len() != values.len() {
            return Err(DecodeError::ArgumentCount {
                name: name.to_string(),
                expected: function.outputs.len(),
                got: values.len(),
            });
        }
        Ok(DynSolValue::Tuple(values.to_vec()).abi_encode_params().into())
    }

    /// Topics and data for emitting `name(values...)`. Dynamic indexed values
    /// are not supported.
    pub fn encode_event(
        &self,
        name: &str,
        values: &[DynSolValue],
    ) -> Result<(Vec<B256>, Bytes), DecodeError> {
        let event = self.event(name)?;
        if event.inputs.len() != values.len() {
            return Err(DecodeError::ArgumentCount {
                name: name.to_string(),
                expected: event.inputs.len(),
                got: values.len(),
            });
        }

        let mut topics = vec![event.selector()];
        let mut body = Vec::new();
        for (param, value) in event.inputs.iter().zip(values) {
            if param.indexed {
                let word = value.as_word().ok_or_else(|| DecodeError::AbiType {
                    name: name.to_string(),
                    reason: format!("indexed parameter `{}` is not a word", param.name),
                })?;
                topics.push(word);
            } else {
                body.push(value.clone());
            }
        }
        Ok((topics, DynSolValue::Tuple(body).abi_encode_params().into()))
    }

    fn first_function(&self, name: &str) -> Result<&Function, DecodeError> {
        self.abi
            .function(name)
            .and_then(|overloads| overloads.first())
            .ok_or_else(|| DecodeError::UnknownMethod(name.to_string()))
    }
}

/// Decode a log against its event definition. Values come back in
/// declaration order; dynamic indexed values are left as their topic hash.
pub fn decode_log(event: &Event, topics: &[B256], data: &[u8]) -> Result<Vec<DynSolValue>, DecodeError> {
    let name = event.name.as_str();
    let indexed_count = event.inputs.iter().filter(|p| p.indexed).count();
    let skip = usize::from(!event.anonymous);
    if topics.len() < skip + indexed_count {
        return Err(DecodeError::Abi {
            name: name.to_string(),
            reason: format!(
                "expected {} topics, got {}",
                skip + indexed_count,
                topics.len()
            ),
        });
    }

    let mut body_types = Vec::new();
    for param in event.inputs.iter().filter(|p| !p.indexed) {
        body_types.push(resolve_type(name, param.resolve())?);
    }
    let mut body = decode_tuple(name, body_types, data)?.into_iter();
    let mut indexed = topics[skip..].iter();

    let mut values = Vec::with_capacity(event.inputs.len());
    for param in &event.inputs {
        if param.indexed {
            let ty = resolve_type(name, param.resolve())?;
            let topic = indexed.next().ok_or_else(|| DecodeError::Abi {
                name: name.to_string(),
                reason: "missing indexed topic".to_string(),
            })?;
            if ty.is_dynamic() {
                values.push(DynSolValue::FixedBytes(*topic, 32));
            } else {
                let value = ty.abi_decode(topic.as_slice()).map_err(|e| DecodeError::Abi {
                    name: name.to_string(),
                    reason: e.to_string(),
                })?;
                values.push(value);
            }
        } else {
            values.push(body.next().ok_or_else(|| DecodeError::Abi {
                name: name.to_string(),
                reason: "missing data value".to_string(),
            })?);
        }
    }
    Ok(values)
}

fn resolve_params(name: &str, params: &[Param]) -> Result<Vec<DynSolType>, DecodeError> {
    params
        .iter()
        .map(|param| resolve_type(name, param.resolve()))
        .collect()
}

fn resolve_type(
    name: &str,
    resolved: Result<DynSolType, alloy::dyn_abi::Error>,
) -> Result<DynSolType, DecodeError> {
    resolved.map_err(|e| DecodeError::AbiType {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

fn decode_tuple(name: &str, types: Vec<DynSolType>, data: &[u8]) -> Result<Vec<DynSolValue>, DecodeError> {
    if types.is_empty() {
        return Ok(Vec::new());
    }
    let decoded = DynSolType::Tuple(types)
        .abi_decode_params(data)
        .map_err(|e| DecodeError::Abi {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
    match decoded {
        DynSolValue::Tuple(values) => Ok(values),
        other => Ok(vec![other]),
    }
}
