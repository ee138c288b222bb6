//! End-to-end tests for the tiddler binary: the local transform command and
//! full workflow runs against a directory-backed store.

mod transform_tests;
