// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod helpers;
pub mod lifecycle_test;
pub mod recovery_test;
pub mod shutdown_test;
