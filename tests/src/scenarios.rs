mod api_scan;
mod daemon_scan;
