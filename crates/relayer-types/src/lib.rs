// Copyright 2022 Webb Technologies Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Plain data types shared by the warp relayer crates.

mod address;
mod id;
mod message;
mod namespace;
pub mod rpc_url;
mod validator;

pub use address::Address;
pub use id::{Id, NodeId};
pub use message::{MessagePosition, ObservedMessage};
pub use namespace::InstanceNamespace;
pub use validator::{PublicKey, Validator, ValidatorSet, ValidatorSetHeight};
