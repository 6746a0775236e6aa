/*
 * Test utilities and mock helpers for Coolctl
 *
 * This module provides common test utilities, mock objects, and helper
 * functions that can be used across different test modules.
 */
